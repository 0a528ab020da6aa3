//! Polygon masking and cropping of rasters.

use geo::{BoundingRect, Contains, MultiPolygon, Point};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{GeoTransform, Grid, NODATA};
use crate::error::{AnalysisError, AnalysisResult};

/// Per-pixel flag telling whether the pixel center lies inside `polygons`
/// `polygons` must be expressed in the grid's CRS
pub fn pixel_centers_inside(
    width: usize,
    height: usize,
    transform: &GeoTransform,
    polygons: &MultiPolygon<f64>,
) -> Vec<bool> {
    let mut inside = vec![false; width * height];
    if width == 0 {
        return inside;
    }

    let fill_row = |row: usize, out: &mut [bool]| {
        for (col, flag) in out.iter_mut().enumerate() {
            let (x, y) = transform.pixel_center(col, row);
            *flag = polygons.contains(&Point::new(x, y));
        }
    };

    #[cfg(feature = "rayon")]
    inside
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| fill_row(row, out));

    #[cfg(not(feature = "rayon"))]
    inside
        .chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| fill_row(row, out));

    inside
}

/// Crop a raster to the bounding window of `polygons` and set every pixel
/// whose center falls outside them to [`NODATA`]
///
/// Fails with a georeference error when the polygons do not overlap the raster.
pub fn crop_to_aoi(grid: &Grid<f64>, polygons: &MultiPolygon<f64>) -> AnalysisResult<Grid<f64>> {
    let rect = polygons
        .bounding_rect()
        .ok_or_else(|| AnalysisError::Georeference("area of interest is empty".into()))?;

    // Fractional pixel positions of the AOI corners; rows grow southwards
    let (c0, r0) = grid.transform.invert(rect.min().x, rect.max().y);
    let (c1, r1) = grid.transform.invert(rect.max().x, rect.min().y);
    let col_start = c0.min(c1).floor().max(0.0) as usize;
    let row_start = r0.min(r1).floor().max(0.0) as usize;
    let col_end = (c0.max(c1).ceil().max(0.0) as usize).min(grid.width);
    let row_end = (r0.max(r1).ceil().max(0.0) as usize).min(grid.height);

    if col_start >= col_end || row_start >= row_end {
        return Err(AnalysisError::Georeference(
            "area of interest does not overlap the raster".into(),
        ));
    }

    let width = col_end - col_start;
    let height = row_end - row_start;
    let (ox, oy) = grid.transform.apply(col_start as f64, row_start as f64);
    let mut coeffs = grid.transform.0;
    coeffs[0] = ox;
    coeffs[3] = oy;
    let transform = GeoTransform(coeffs);

    let inside = pixel_centers_inside(width, height, &transform, polygons);
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let src_row = &grid.data[(row_start + row) * grid.width..][..grid.width];
        for col in 0..width {
            if inside[row * width + col] {
                data.push(src_row[col_start + col]);
            } else {
                data.push(NODATA);
            }
        }
    }

    Ok(Grid {
        width,
        height,
        transform,
        data,
    })
}
