use image::{GrayImage, Luma};

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `tiles x tiles` grid (edges padded by reflection when the size
/// is not a multiple of the grid). Each tile gets a clipped, redistributed histogram turned
/// into a lookup table, and every output pixel is bilinearly interpolated between the tables
/// of its four nearest tile centres.
///
/// Returns `None` when the image is smaller than the tile grid, in which case the caller is
/// expected to fall back to global equalization.
pub fn clahe(img: &GrayImage, tiles: u32, clip_limit: f32) -> Option<GrayImage> {
    let (width, height) = img.dimensions();
    if tiles == 0 || width < tiles || height < tiles || clip_limit.is_nan() || clip_limit <= 0.0 {
        return None;
    }

    let tile_w = width.div_ceil(tiles);
    let tile_h = height.div_ceil(tiles);
    let tile_area = (tile_w * tile_h) as usize;
    let clip = ((clip_limit * tile_area as f32 / BINS as f32) as usize).max(1);
    let lut_scale = 255.0 / tile_area as f32;

    let mut luts = vec![[0u8; BINS]; (tiles * tiles) as usize];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let mut hist = [0usize; BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let sy = reflect(y, height);
                for x in tx * tile_w..(tx + 1) * tile_w {
                    let sx = reflect(x, width);
                    hist[img.get_pixel(sx, sy)[0] as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);
            luts[(ty * tiles + tx) as usize] = build_lut(&hist, lut_scale);
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let last = tiles as i64 - 1;
    let mut out = GrayImage::new(width, height);

    for y in 0..height {
        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor() as i64;
        let ya = tyf - ty1 as f32;
        let (ty1, ty2) = (ty1.max(0) as u32, (ty1 + 1).min(last) as u32);

        for x in 0..width {
            let txf = x as f32 * inv_tw - 0.5;
            let tx1 = txf.floor() as i64;
            let xa = txf - tx1 as f32;
            let (tx1, tx2) = (tx1.max(0) as u32, (tx1 + 1).min(last) as u32);

            let v = img.get_pixel(x, y)[0] as usize;
            let lut = |tx: u32, ty: u32| luts[(ty * tiles + tx) as usize][v] as f32;

            let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
            let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
            let value = top * (1.0 - ya) + bottom * ya;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    Some(out)
}

/// Mirror an out-of-range coordinate back into `[0, len)` without repeating the edge pixel
fn reflect(i: u32, len: u32) -> u32 {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let i = i % period;
    if i < len { i } else { period - i }
}

fn clip_histogram(hist: &mut [usize; BINS], clip: usize) {
    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let batch = excess / BINS;
    let mut residual = excess - batch * BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

fn build_lut(hist: &[usize; BINS], scale: f32) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    let mut sum = 0usize;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
