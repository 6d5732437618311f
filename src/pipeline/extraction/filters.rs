//! Grayscale image operators used by the preprocessing variants.
//!
//! Pure Rust, no `imageproc`/OpenCV dependency. Each operator is a pure
//! function from an input buffer to a new buffer so variants can share the
//! resized source without interfering.
//!
//! Border handling follows the conventions the thresholds were tuned with:
//! replicated edges for blurs and rotation, out-of-bounds neighbours ignored
//! for morphology and bilateral filtering.

use image::{GrayImage, Luma, Rgb, RgbImage};

// ═══════════════════════════════════════════════════════════
// Colour
// ═══════════════════════════════════════════════════════════

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = rgb.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (x, y, p) in rgb.enumerate_pixels() {
        gray.put_pixel(x, y, Luma([luma(p)]));
    }
    gray
}

fn luma(p: &Rgb<u8>) -> u8 {
    (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Flatten specular highlights: full-range YCbCr, CLAHE on Y only, back to RGB.
///
/// Chroma is carried through untouched so coloured print keeps its hue while
/// blown-out regions get their local contrast back.
pub fn suppress_glare(rgb: &RgbImage, clip_limit: f32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let mut y_plane = GrayImage::new(w, h);
    let mut chroma = Vec::with_capacity((w as usize) * (h as usize));

    for (x, y, p) in rgb.enumerate_pixels() {
        let (r, g, b) = (p.0[0] as f32, p.0[1] as f32, p.0[2] as f32);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        y_plane.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
        chroma.push((cb, cr));
    }

    let y_eq = clahe(&y_plane, clip_limit, (8, 8));

    let mut out = RgbImage::new(w, h);
    for (i, (x, y, p)) in y_eq.enumerate_pixels().enumerate() {
        let luma = p.0[0] as f32;
        let (cb, cr) = chroma[i];
        let r = luma + 1.402 * (cr - 128.0);
        let g = luma - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
        let b = luma + 1.772 * (cb - 128.0);
        out.put_pixel(x, y, Rgb([to_u8(r), to_u8(g), to_u8(b)]));
    }
    out
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn invert(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = 255 - p.0[0];
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Contrast
// ═══════════════════════════════════════════════════════════

/// Contrast-limited adaptive histogram equalization.
///
/// The image is partitioned into `grid.0 x grid.1` tiles. Each tile gets a
/// clipped-histogram equalization LUT (`clip_limit` is relative to the mean
/// bin height, as in OpenCV); pixels are mapped by bilinear interpolation
/// between the LUTs of the four nearest tile centres.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let tiles_x = grid.0.clamp(1, w);
    let tiles_y = grid.1.clamp(1, h);

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = (ty * h / tiles_y, (ty + 1) * h / tiles_y);
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * w / tiles_x, (tx + 1) * w / tiles_x);
            luts.push(tile_lut(img, x0, x1, y0, y1, clip_limit));
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        let (ty0, ty1, ay) = interp_coords(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, ax) = interp_coords(x, tile_w, tiles_x);
            let v = img.get_pixel(x, y).0[0] as usize;
            let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;

            let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
            let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
            out.put_pixel(x, y, Luma([to_u8(top * (1.0 - ay) + bottom * ay)]));
        }
    }
    out
}

/// Neighbouring tile indices and blend weight for one axis.
fn interp_coords(pos: u32, tile_size: f32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile_size - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let t0 = (f.floor() as u32).min(tiles - 1);
    let t1 = (t0 + 1).min(tiles - 1);
    let a = if t1 == t0 { 0.0 } else { f - t0 as f32 };
    (t0, t1, a.clamp(0.0, 1.0))
}

fn tile_lut(img: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let area = ((x1 - x0) * (y1 - y0)).max(1);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let batch = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for bin in hist.iter_mut().step_by(step).take(residual) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cumulative += bin;
        lut[i] = to_u8(cumulative as f32 * scale);
    }
    lut
}

// ═══════════════════════════════════════════════════════════
// Smoothing
// ═══════════════════════════════════════════════════════════

/// Normalized 1-D Gaussian kernel of odd length `ksize`.
///
/// A non-positive `sigma` is derived from the kernel size the way OpenCV does:
/// `0.3 * ((ksize - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: usize, sigma: f32) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let half = (ksize / 2) as f32;
    let mut kernel: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Kernel length covering +-3 sigma, odd.
fn ksize_for_sigma(sigma: f32) -> usize {
    (((sigma * 3.0).ceil() as usize) * 2 + 1).max(3)
}

/// Separable convolution with replicated borders. Returns unrounded values.
fn convolve_separable(img: &GrayImage, kernel: &[f32]) -> Vec<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let radius = (kernel.len() / 2) as isize;
    let src = img.as_raw();
    let clamp = |v: isize, max: usize| v.clamp(0, max as isize - 1) as usize;

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as isize + k as isize - radius, w);
                acc += row[sx] as f32 * weight;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp(y as isize + k as isize - radius, h);
                acc += horizontal[sy * w + x] * weight;
            }
            out[y * w + x] = acc;
        }
    }
    out
}

pub fn gaussian_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let kernel = gaussian_kernel(ksize_for_sigma(sigma), sigma);
    let blurred = convolve_separable(img, &kernel);
    from_f32(img.width(), img.height(), &blurred)
}

fn from_f32(w: u32, h: u32, values: &[f32]) -> GrayImage {
    let raw: Vec<u8> = values.iter().map(|v| to_u8(*v)).collect();
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Sharpen by subtracting a blurred copy: `amount * src + (1 - amount) * blur`.
///
/// `amount = 1.5` gives the 1.5 / -0.5 weighting.
pub fn unsharp_mask(img: &GrayImage, sigma: f32, amount: f32) -> GrayImage {
    let blurred = gaussian_blur(img, sigma);
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, p) in img.enumerate_pixels() {
        let b = blurred.get_pixel(x, y).0[0] as f32;
        let v = amount * p.0[0] as f32 + (1.0 - amount) * b;
        out.put_pixel(x, y, Luma([to_u8(v)]));
    }
    out
}

/// Edge-preserving bilateral filter on a grayscale image.
///
/// Neighbourhood is the disc of `radius` pixels around each centre; weights
/// are the product of a spatial Gaussian (`sigma_space`) and an intensity
/// Gaussian (`sigma_color`). Both weight tables are precomputed.
pub fn bilateral_filter(img: &GrayImage, radius: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let r = radius as i64;

    let color_lut: Vec<f32> = (0..256)
        .map(|d| {
            let d = d as f32;
            (-(d * d) / (2.0 * sigma_color * sigma_color)).exp()
        })
        .collect();

    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let dist_sq = (dx * dx + dy * dy) as f32;
            if dist_sq <= (r * r) as f32 {
                let weight = (-dist_sq / (2.0 * sigma_space * sigma_space)).exp();
                offsets.push((dx, dy, weight));
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let center = img.get_pixel(x as u32, y as u32).0[0];
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;

            for &(dx, dy, spatial) in &offsets {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let v = img.get_pixel(nx as u32, ny as u32).0[0];
                let weight = spatial * color_lut[v.abs_diff(center) as usize];
                sum += v as f32 * weight;
                weight_sum += weight;
            }

            let v = if weight_sum > 0.0 { sum / weight_sum } else { center as f32 };
            out.put_pixel(x as u32, y as u32, Luma([to_u8(v)]));
        }
    }
    out
}

/// Non-local means denoising.
///
/// For every displacement inside the `search_radius` window, the mean squared
/// difference between the patch around each pixel and the displaced patch is
/// computed with one box filter over an integral image, so cost is
/// `O(pixels * search_window)` independent of patch size. Weights are
/// `exp(-d / h^2)`.
pub fn non_local_means(img: &GrayImage, h: f32, patch_radius: u32, search_radius: u32) -> GrayImage {
    let (w, ht) = (img.width() as usize, img.height() as usize);
    if w == 0 || ht == 0 || h <= 0.0 {
        return img.clone();
    }
    let src = img.as_raw();
    let sr = search_radius as isize;
    let pr = patch_radius as usize;

    // Mean patch distances beyond ~10 h^2 contribute nothing measurable.
    let h2 = h * h;
    let max_dist = (h2 * 10.0).ceil() as usize;
    let weight_lut: Vec<f32> = (0..=max_dist).map(|d| (-(d as f32) / h2).exp()).collect();

    let mut sum_w = vec![0f32; w * ht];
    let mut sum_wv = vec![0f32; w * ht];
    let mut diff = vec![0u32; w * ht];
    let mut integral = vec![0u64; (w + 1) * (ht + 1)];
    let clamp = |v: isize, max: usize| v.clamp(0, max as isize - 1) as usize;

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for y in 0..ht {
                let sy = clamp(y as isize + dy, ht);
                for x in 0..w {
                    let sx = clamp(x as isize + dx, w);
                    let d = src[y * w + x] as i32 - src[sy * w + sx] as i32;
                    diff[y * w + x] = (d * d) as u32;
                }
            }

            build_integral(&diff, w, ht, &mut integral);

            for y in 0..ht {
                let y0 = y.saturating_sub(pr);
                let y1 = (y + pr + 1).min(ht);
                let sy = clamp(y as isize + dy, ht);
                for x in 0..w {
                    let x0 = x.saturating_sub(pr);
                    let x1 = (x + pr + 1).min(w);
                    let area = ((x1 - x0) * (y1 - y0)) as u64;
                    let total = integral[y1 * (w + 1) + x1] + integral[y0 * (w + 1) + x0]
                        - integral[y0 * (w + 1) + x1]
                        - integral[y1 * (w + 1) + x0];
                    let mean = (total / area) as usize;
                    if mean > max_dist {
                        continue;
                    }
                    let weight = weight_lut[mean];
                    let sx = clamp(x as isize + dx, w);
                    sum_w[y * w + x] += weight;
                    sum_wv[y * w + x] += weight * src[sy * w + sx] as f32;
                }
            }
        }
    }

    let values: Vec<f32> = sum_wv
        .iter()
        .zip(&sum_w)
        .zip(src)
        .map(|((wv, wsum), orig)| if *wsum > 0.0 { wv / wsum } else { *orig as f32 })
        .collect();
    from_f32(w as u32, ht as u32, &values)
}

fn build_integral(values: &[u32], w: usize, h: usize, integral: &mut [u64]) {
    let stride = w + 1;
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += values[y * w + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Binarization
// ═══════════════════════════════════════════════════════════

/// Adaptive Gaussian threshold: a pixel becomes white (255) when it is
/// brighter than its Gaussian-weighted `block_size x block_size` neighbourhood
/// mean minus `c`, black otherwise.
pub fn adaptive_threshold_gaussian(img: &GrayImage, block_size: usize, c: f32) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let kernel = gaussian_kernel(block_size, 0.0);
    let means = convolve_separable(img, &kernel);
    let mut out = GrayImage::new(img.width(), img.height());
    for (i, (x, y, p)) in img.enumerate_pixels().enumerate() {
        let threshold = means[i].round() - c;
        let v = if p.0[0] as f32 > threshold { 255 } else { 0 };
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

/// Adaptive mean threshold: like `adaptive_threshold_gaussian` but against the
/// plain box mean of the neighbourhood. Near the border the window is
/// clipped to the image.
pub fn adaptive_threshold_mean(img: &GrayImage, block_size: usize, c: f32) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    if w == 0 || h == 0 {
        return img.clone();
    }
    let values: Vec<u32> = img.pixels().map(|p| p.0[0] as u32).collect();
    let mut integral = vec![0u64; (w + 1) * (h + 1)];
    build_integral(&values, w, h, &mut integral);

    let r = block_size / 2;
    let stride = w + 1;
    let mut out = GrayImage::new(img.width(), img.height());
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let total = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let area = ((y1 - y0) * (x1 - x0)) as f32;
            let threshold = (total as f32 / area).round() - c;
            let v = if values[y * w + x] as f32 > threshold { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Luma([v]));
        }
    }
    out
}

/// Global threshold maximizing between-class variance.
pub fn otsu_level(img: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, c)| i as f64 * *c as f64).sum();

    let mut best = (0u8, -1.0f64);
    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    for (t, count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * *count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.1 {
            best = (t as u8, between);
        }
    }
    best.0
}

pub fn otsu_threshold(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { 255 } else { 0 };
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Morphology
// ═══════════════════════════════════════════════════════════

/// Rectangular-kernel min/max filter with the anchor at `(kw / 2, kh / 2)`.
fn rect_rank_filter(img: &GrayImage, kw: u32, kh: u32, take_max: bool) -> GrayImage {
    let (w, h) = img.dimensions();
    if kw <= 1 && kh <= 1 {
        return img.clone();
    }
    let pick = |a: u8, b: u8| if take_max { a.max(b) } else { a.min(b) };
    let (ax, ay) = ((kw / 2) as i64, (kh / 2) as i64);

    let mut rows = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w as i64 {
            let mut acc = img.get_pixel(x as u32, y).0[0];
            for k in 0..kw as i64 {
                let sx = x - ax + k;
                if sx >= 0 && sx < w as i64 {
                    acc = pick(acc, img.get_pixel(sx as u32, y).0[0]);
                }
            }
            rows.put_pixel(x as u32, y, Luma([acc]));
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w {
            let mut acc = rows.get_pixel(x, y as u32).0[0];
            for k in 0..kh as i64 {
                let sy = y - ay + k;
                if sy >= 0 && sy < h as i64 {
                    acc = pick(acc, rows.get_pixel(x, sy as u32).0[0]);
                }
            }
            out.put_pixel(x, y as u32, Luma([acc]));
        }
    }
    out
}

pub fn dilate(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    rect_rank_filter(img, kw, kh, true)
}

pub fn erode(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    rect_rank_filter(img, kw, kh, false)
}

/// Dilate then erode: fills pinholes in white regions.
pub fn morph_close(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    erode(&dilate(img, kw, kh), kw, kh)
}

/// Erode then dilate: removes isolated white specks.
pub fn morph_open(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    dilate(&erode(img, kw, kh), kw, kh)
}

// ═══════════════════════════════════════════════════════════
// Deskew
// ═══════════════════════════════════════════════════════════

/// Below this (degrees) a skew correction is not worth the resampling blur.
pub const MIN_DESKEW_DEGREES: f32 = 0.5;

/// Pixels darker than this count as foreground (ink) for skew estimation.
const INK_LEVEL: u8 = 128;

/// Angle of the minimum-area rectangle enclosing all ink pixels, reported in
/// `(-90, 0]` degrees: the negated angle of the rectangle's edge, mod 90.
///
/// Returns `None` when there is not enough ink to define a rectangle.
pub fn min_area_rect_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = img.dimensions();
    let mut points = Vec::new();
    for y in 0..h {
        let mut first = None;
        let mut last = None;
        for x in 0..w {
            if img.get_pixel(x, y).0[0] < INK_LEVEL {
                first.get_or_insert(x);
                last = Some(x);
            }
        }
        if let (Some(l), Some(r)) = (first, last) {
            points.push((l as i64, y as i64));
            if r != l {
                points.push((r as i64, y as i64));
            }
        }
    }

    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(f64, f64)> = None; // (area, edge angle)
    for i in 0..hull.len() {
        let (x0, y0) = hull[i];
        let (x1, y1) = hull[(i + 1) % hull.len()];
        let (ex, ey) = ((x1 - x0) as f64, (y1 - y0) as f64);
        let len = (ex * ex + ey * ey).sqrt();
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (ex / len, ey / len);

        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for &(px, py) in &hull {
            let (px, py) = (px as f64, py as f64);
            let u = px * ux + py * uy;
            let v = -px * uy + py * ux;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |(a, _)| area < a) {
            best = Some((area, uy.atan2(ux).to_degrees()));
        }
    }

    best.map(|(_, edge)| -(edge.rem_euclid(90.0)) as f32)
}

/// Andrew's monotone chain. Returns the hull counter-clockwise without
/// repeating the first point; collinear points are dropped.
fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(i64, i64)> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(i64, i64)> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Map a raw rectangle angle to the correction angle in `[-45, 45]`.
///
/// Raw angles are first folded into `(-90, 0]` (a rectangle's orientation is
/// only defined mod 90), then `θ < -45 → -(90 + θ)`, otherwise `-θ`.
pub fn normalize_skew_angle(raw_degrees: f32) -> f32 {
    if !raw_degrees.is_finite() {
        return 0.0;
    }
    let folded = -((-raw_degrees).rem_euclid(90.0));
    let folded = if folded <= -90.0 { 0.0 } else { folded };
    if folded < -45.0 {
        -(90.0 + folded)
    } else {
        -folded
    }
}

/// Rotate about the image centre by `degrees` (positive = counter-clockwise
/// as displayed). Bilinear sampling, replicated edges, same canvas size.
pub fn rotate_about_center(img: &GrayImage, degrees: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let (sin, cos) = (degrees.to_radians() as f64).sin_cos();
    let (cx, cy) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
    let (max_x, max_y) = (w as f64 - 1.0, h as f64 - 1.0);

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            let sx = (cos * dx - sin * dy + cx).clamp(0.0, max_x);
            let sy = (sin * dx + cos * dy + cy).clamp(0.0, max_y);
            out.put_pixel(x, y, Luma([bilinear(img, sx, sy)]));
        }
    }
    out
}

fn bilinear(img: &GrayImage, x: f64, y: f64) -> u8 {
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);
    let p = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;

    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

/// Estimate skew from the ink's minimum-area rectangle and rotate it away.
///
/// Returns the corrected image and the applied rotation in degrees (0 when
/// the estimate is unavailable or below `MIN_DESKEW_DEGREES`).
pub fn deskew(img: &GrayImage) -> (GrayImage, f32) {
    let Some(raw) = min_area_rect_angle(img) else {
        return (img.clone(), 0.0);
    };
    let angle = normalize_skew_angle(raw);
    if angle.abs() < MIN_DESKEW_DEGREES {
        return (img.clone(), 0.0);
    }
    (rotate_about_center(img, angle), angle)
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_image(w: u32, h: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for y in h / 2 - 10..h / 2 + 10 {
            for x in w / 4..3 * w / 4 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        img
    }

    fn count_ink(img: &GrayImage) -> usize {
        img.pixels().filter(|p| p.0[0] < 128).count()
    }

    #[test]
    fn gray_conversion_bt601() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let gray = rgb_to_gray(&rgb);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
    }

    #[test]
    fn invert_flips_values() {
        let img = GrayImage::from_pixel(3, 3, Luma([40]));
        assert_eq!(invert(&img).get_pixel(1, 1).0[0], 215);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(11, 0.0);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-6);
        assert!(k[5] > k[4]);
    }

    #[test]
    fn gaussian_blur_preserves_uniform_image() {
        let img = GrayImage::from_pixel(20, 20, Luma([90]));
        let out = gaussian_blur(&img, 2.0);
        assert!(out.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn clahe_spreads_narrow_histogram() {
        let mut img = GrayImage::new(64, 64);
        for (x, _, p) in img.enumerate_pixels_mut() {
            p.0[0] = 100 + (x % 20) as u8;
        }
        let out = clahe(&img, 2.0, (8, 8));
        let (min, max) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
        assert!(max - min > 19, "range should widen, got {min}..{max}");
    }

    #[test]
    fn clahe_handles_tiny_image() {
        let img = GrayImage::from_pixel(3, 2, Luma([10]));
        let out = clahe(&img, 2.0, (8, 8));
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn adaptive_threshold_separates_text_from_background() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([200]));
        for y in 18..22 {
            for x in 5..35 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        let out = adaptive_threshold_gaussian(&img, 11, 2.0);
        assert_eq!(out.get_pixel(20, 20).0[0], 0);
        assert_eq!(out.get_pixel(2, 2).0[0], 255);
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn adaptive_mean_separates_text_from_background() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([200]));
        for y in 18..22 {
            for x in 5..35 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        let out = adaptive_threshold_mean(&img, 11, 2.0);
        assert_eq!(out.get_pixel(20, 20).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(39, 39).0[0], 255);
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn otsu_splits_bimodal_image() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([30]));
        for x in 0..5 {
            for y in 0..10 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        let level = otsu_level(&img);
        assert!((30..220).contains(&level));
        let out = otsu_threshold(&img);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(9, 9).0[0], 0);
    }

    #[test]
    fn morph_open_removes_speck() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([0]));
        img.put_pixel(5, 5, Luma([255]));
        let out = morph_open(&img, 2, 2);
        assert_eq!(out.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn morph_close_fills_pinhole() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([255]));
        img.put_pixel(5, 5, Luma([0]));
        let out = morph_close(&img, 2, 2);
        assert_eq!(out.get_pixel(5, 5).0[0], 255);
    }

    #[test]
    fn unit_kernel_morphology_is_identity() {
        let img = bar_image(40, 40);
        assert_eq!(morph_open(&morph_close(&img, 1, 1), 1, 1), img);
    }

    #[test]
    fn bilateral_keeps_hard_edge() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([0]));
        for y in 0..20 {
            for x in 10..20 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let out = bilateral_filter(&img, 4, 75.0, 75.0);
        assert!(out.get_pixel(8, 10).0[0] < 20);
        assert!(out.get_pixel(11, 10).0[0] > 235);
    }

    #[test]
    fn nlm_reduces_salt_noise() {
        let mut img = GrayImage::from_pixel(24, 24, Luma([120]));
        img.put_pixel(12, 12, Luma([135]));
        let out = non_local_means(&img, 10.0, 3, 3);
        let v = out.get_pixel(12, 12).0[0];
        assert!(v < 135, "speck should be smoothed, got {v}");
        assert_eq!(out.get_pixel(2, 2).0[0], 120);
    }

    #[test]
    fn unsharp_increases_edge_contrast() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([100]));
        for y in 0..20 {
            for x in 10..20 {
                img.put_pixel(x, y, Luma([150]));
            }
        }
        let out = unsharp_mask(&img, 2.0, 1.5);
        assert!(out.get_pixel(9, 5).0[0] < 100);
        assert!(out.get_pixel(10, 5).0[0] > 150);
    }

    #[test]
    fn glare_suppression_preserves_dimensions_and_gray_hue() {
        let rgb = RgbImage::from_pixel(32, 16, Rgb([128, 128, 128]));
        let out = suppress_glare(&rgb, 3.0);
        assert_eq!(out.dimensions(), (32, 16));
        let p = out.get_pixel(5, 5);
        assert_eq!(p.0[0], p.0[1]);
        assert_eq!(p.0[1], p.0[2]);
    }

    #[test]
    fn normalize_skew_angle_range() {
        let mut raw = -720.0f32;
        while raw <= 720.0 {
            let n = normalize_skew_angle(raw);
            assert!((-45.0..=45.0).contains(&n), "raw {raw} -> {n}");
            raw += 0.25;
        }
        assert_eq!(normalize_skew_angle(f32::NAN), 0.0);
    }

    #[test]
    fn normalize_skew_angle_formula() {
        assert!((normalize_skew_angle(-80.0) - -10.0).abs() < 1e-4);
        assert!((normalize_skew_angle(-10.0) - 10.0).abs() < 1e-4);
        assert_eq!(normalize_skew_angle(0.0), 0.0);
        assert_eq!(normalize_skew_angle(-90.0), 0.0);
    }

    #[test]
    fn straight_bar_has_no_skew() {
        let img = bar_image(200, 120);
        let raw = min_area_rect_angle(&img).unwrap();
        assert!(normalize_skew_angle(raw).abs() < 0.5);
        let (_, applied) = deskew(&img);
        assert_eq!(applied, 0.0);
    }

    #[test]
    fn rotated_bar_skew_is_detected_and_undone() {
        let img = bar_image(300, 300);
        let tilted = rotate_about_center(&img, 10.0);
        let raw = min_area_rect_angle(&tilted).unwrap();
        let correction = normalize_skew_angle(raw);
        assert!(
            (correction + 10.0).abs() < 1.0,
            "expected ~-10 deg correction, got {correction}"
        );

        let (straightened, applied) = deskew(&tilted);
        assert!((applied + 10.0).abs() < 1.0);
        let residual = normalize_skew_angle(min_area_rect_angle(&straightened).unwrap());
        assert!(residual.abs() < 1.0, "residual skew {residual}");
    }

    #[test]
    fn blank_image_has_no_skew_estimate() {
        let img = GrayImage::from_pixel(50, 50, Luma([255]));
        assert!(min_area_rect_angle(&img).is_none());
        let (out, applied) = deskew(&img);
        assert_eq!(applied, 0.0);
        assert_eq!(out, img);
    }

    #[test]
    fn rotation_keeps_canvas_and_ink() {
        let img = bar_image(100, 100);
        let rotated = rotate_about_center(&img, 30.0);
        assert_eq!(rotated.dimensions(), (100, 100));
        let before = count_ink(&img) as f32;
        let after = count_ink(&rotated) as f32;
        assert!((after - before).abs() / before < 0.1);
    }
}
