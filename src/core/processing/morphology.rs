//! Binary morphology with a circular kernel. Neighbours outside the raster
//! are ignored.
use ndarray::Array2;

fn disk(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

fn focal(mask: &Array2<bool>, radius: usize, any: bool) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let (rows, cols) = mask.dim();
    let kernel = disk(radius);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut neighbours = kernel.iter().filter_map(|(dy, dx)| {
            let y = r as isize + dy;
            let x = c as isize + dx;
            if y < 0 || x < 0 || y >= rows as isize || x >= cols as isize {
                None
            } else {
                Some(mask[[y as usize, x as usize]])
            }
        });
        if any {
            neighbours.any(|v| v)
        } else {
            neighbours.all(|v| v)
        }
    })
}

/// Focal minimum: a pixel stays set only if its whole neighbourhood is set.
pub fn erode(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    focal(mask, radius, false)
}

/// Focal maximum: a pixel is set if anything in its neighbourhood is set.
pub fn dilate(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    focal(mask, radius, true)
}
