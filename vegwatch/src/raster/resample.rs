//! Raster resampling.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{GeoTransform, Grid, NODATA};

/// Bilinear resize of a continuous-valued raster to `new_width` x `new_height`
///
/// Pixel centers are aligned (half-pixel convention) and source samples equal
/// to [`NODATA`] are left out of the weighting; an output pixel whose four
/// neighbours are all nodata stays nodata. The returned grid keeps the source
/// origin with its pixel size scaled to cover the same extent.
pub fn bilinear(src: &Grid<f64>, new_width: usize, new_height: usize) -> Grid<f64> {
    let [c, a, b, f, d, e] = src.transform.0;
    let sx = src.width as f64 / new_width.max(1) as f64;
    let sy = src.height as f64 / new_height.max(1) as f64;
    let transform = GeoTransform([c, a * sx, b * sy, f, d * sx, e * sy]);

    let mut data = vec![NODATA; new_width * new_height];
    if src.width == 0 || src.height == 0 || new_width == 0 || new_height == 0 {
        return Grid {
            width: new_width,
            height: new_height,
            transform,
            data,
        };
    }

    let fill_row = |row: usize, out: &mut [f64]| {
        let y = ((row as f64 + 0.5) * sy - 0.5).clamp(0.0, (src.height - 1) as f64);
        let y0 = y.floor() as usize;
        let y1 = (y0 + 1).min(src.height - 1);
        let fy = y - y0 as f64;

        for (col, value) in out.iter_mut().enumerate() {
            let x = ((col as f64 + 0.5) * sx - 0.5).clamp(0.0, (src.width - 1) as f64);
            let x0 = x.floor() as usize;
            let x1 = (x0 + 1).min(src.width - 1);
            let fx = x - x0 as f64;

            let samples = [
                (x0, y0, (1.0 - fx) * (1.0 - fy)),
                (x1, y0, fx * (1.0 - fy)),
                (x0, y1, (1.0 - fx) * fy),
                (x1, y1, fx * fy),
            ];

            let mut sum = 0.0;
            let mut weight = 0.0;
            for (sc, sr, w) in samples {
                let v = src.data[sr * src.width + sc];
                if v != NODATA && v.is_finite() && w > 0.0 {
                    sum += v * w;
                    weight += w;
                }
            }
            if weight > 0.0 {
                *value = sum / weight;
            }
        }
    };

    #[cfg(feature = "rayon")]
    data.par_chunks_mut(new_width)
        .enumerate()
        .for_each(|(row, out)| fill_row(row, out));

    #[cfg(not(feature = "rayon"))]
    data.chunks_mut(new_width)
        .enumerate()
        .for_each(|(row, out)| fill_row(row, out));

    Grid {
        width: new_width,
        height: new_height,
        transform,
        data,
    }
}
