use image::{GrayImage, Luma};

use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into a `tiles x tiles` grid. Each tile's histogram is clipped at
/// `clip_limit * tile_area / 256` counts, the clipped excess is spread evenly over all bins,
/// and the resulting equalization curves are blended bilinearly between tile centres.
///
/// Parameters: `clip_limit` (1..=40, default 2.0), `tiles` (2..=64, default 8).
pub fn clahe(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let clip_limit = params.number(FilterId::Clahe, "clip_limit", 2.0, 1.0, 40.0)?;
    let tiles = params.integer(FilterId::Clahe, "tiles", 8, 2, 64)?;

    let (width, height) = image.dimensions();
    if tiles > width.min(height) {
        return Err(FilterError::IncompatibleDimensions {
            filter: FilterId::Clahe.as_str().to_string(),
            window: tiles,
            width,
            height,
        });
    }

    let grid = TileGrid::new(width as usize, height as usize, tiles as usize);
    let luts = grid.equalization_curves(image, clip_limit);

    let mut out = GrayImage::new(width, height);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let v = image.get_pixel(x, y).0[0] as usize;
        let (tx0, tx1, ax) = grid.neighbours(x as usize, grid.tile_w, grid.cols);
        let (ty0, ty1, ay) = grid.neighbours(y as usize, grid.tile_h, grid.rows);

        let top = luts[ty0 * grid.cols + tx0][v] as f32 * (1.0 - ax) + luts[ty0 * grid.cols + tx1][v] as f32 * ax;
        let bottom = luts[ty1 * grid.cols + tx0][v] as f32 * (1.0 - ax) + luts[ty1 * grid.cols + tx1][v] as f32 * ax;
        let value = top * (1.0 - ay) + bottom * ay;
        *px = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    Ok(out)
}

struct TileGrid {
    width: usize,
    height: usize,
    tile_w: usize,
    tile_h: usize,
    cols: usize,
    rows: usize,
}

impl TileGrid {
    fn new(width: usize, height: usize, tiles: usize) -> Self {
        let tile_w = width.div_ceil(tiles);
        let tile_h = height.div_ceil(tiles);
        Self {
            width,
            height,
            tile_w,
            tile_h,
            cols: width.div_ceil(tile_w),
            rows: height.div_ceil(tile_h),
        }
    }

    fn equalization_curves(&self, image: &GrayImage, clip_limit: f64) -> Vec<[u8; 256]> {
        let mut luts = Vec::with_capacity(self.cols * self.rows);
        for ty in 0..self.rows {
            for tx in 0..self.cols {
                let x0 = tx * self.tile_w;
                let y0 = ty * self.tile_h;
                let x1 = (x0 + self.tile_w).min(self.width);
                let y1 = (y0 + self.tile_h).min(self.height);

                let mut hist = [0u32; 256];
                for y in y0..y1 {
                    for x in x0..x1 {
                        hist[image.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                    }
                }
                let area = ((x1 - x0) * (y1 - y0)) as u32;
                clip_histogram(&mut hist, clip_limit, area);
                luts.push(cumulative_lut(&hist, area));
            }
        }
        luts
    }

    /// Tiles whose centres bracket `pos` along one axis, and the blend weight of the second.
    fn neighbours(&self, pos: usize, tile: usize, count: usize) -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        if f <= 0.0 {
            return (0, 0, 0.0);
        }
        let t0 = (f.floor() as usize).min(count - 1);
        let t1 = (t0 + 1).min(count - 1);
        let weight = if t0 == t1 { 0.0 } else { f - t0 as f32 };
        (t0, t1, weight.clamp(0.0, 1.0))
    }
}

fn clip_histogram(hist: &mut [u32; 256], clip_limit: f64, area: u32) {
    let limit = ((clip_limit * area as f64 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }
}

fn cumulative_lut(hist: &[u32; 256], area: u32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    let scale = 255.0 / area as f64;
    let mut cdf = 0u32;
    for (v, count) in hist.iter().enumerate() {
        cdf += count;
        lut[v] = (cdf as f64 * scale).round().min(255.0) as u8;
    }
    lut
}
