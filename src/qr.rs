//! Terminal rendering of the QR codes returned by `POST /api/qr`.
//!
//! The server answers with a base64 PNG. The image is reduced to its module
//! grid (the finder pattern in the top-left corner is seven modules wide) and
//! every two grid rows become one line of half-block characters.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::GrayImage;

/// Modules of white border kept around the code when rendering.
const QUIET_ZONE: usize = 2;
const DARK_THRESHOLD: u8 = 128;

/// A decoded QR code as a grid of dark (`true`) and light modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrMatrix {
    size: usize,
    modules: Vec<bool>,
}

impl QrMatrix {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }
        self.modules[y * self.size + x]
    }

    /// Half-block lines, dark modules drawn as filled cells. Each output
    /// line covers two module rows.
    pub fn render_lines(&self) -> Vec<String> {
        let total = self.size + QUIET_ZONE * 2;
        let at = |x: usize, y: usize| -> bool {
            if x < QUIET_ZONE || y < QUIET_ZONE {
                return false;
            }
            self.is_dark(x - QUIET_ZONE, y - QUIET_ZONE)
        };
        (0..total)
            .step_by(2)
            .map(|y| {
                (0..total)
                    .map(|x| match (at(x, y), at(x, y + 1)) {
                        (true, true) => '█',
                        (true, false) => '▀',
                        (false, true) => '▄',
                        (false, false) => ' ',
                    })
                    .collect()
            })
            .collect()
    }

    /// Terminal columns needed by [`render_lines`](Self::render_lines).
    pub fn width(&self) -> usize {
        self.size + QUIET_ZONE * 2
    }
}

/// Decodes the base64 payload, accepting an optional `data:` URL prefix.
pub fn decode_png(payload: &str) -> Result<GrayImage> {
    let data = match payload.split_once("base64,") {
        Some((head, rest)) if head.starts_with("data:") => rest,
        _ => payload,
    };
    let bytes = STANDARD
        .decode(data.trim())
        .context("qr: decode base64 payload")?;
    let img = image::load_from_memory(&bytes).context("qr: decode image")?;
    Ok(img.to_luma8())
}

pub fn matrix_from_base64(payload: &str) -> Result<QrMatrix> {
    let img = decode_png(payload)?;
    matrix_from_image(&img)
}

/// Samples the image at module centers.
pub fn matrix_from_image(img: &GrayImage) -> Result<QrMatrix> {
    let (width, height) = img.dimensions();
    let dark = |x: u32, y: u32| img.get_pixel(x, y).0[0] < DARK_THRESHOLD;

    let Some((left, top)) = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .find(|(x, y)| dark(*x, *y))
    else {
        bail!("qr: image contains no dark modules");
    };

    let run = (left..width).take_while(|x| dark(*x, top)).count() as u32;
    let module = (run / 7).max(1);

    let right = (0..width)
        .rev()
        .find(|x| (0..height).any(|y| dark(*x, y)))
        .unwrap_or(left);
    let span = right - left + 1;
    let size = (span / module).max(1) as usize;

    let mut modules = Vec::with_capacity(size * size);
    for row in 0..size as u32 {
        for col in 0..size as u32 {
            let x = (left + col * module + module / 2).min(width - 1);
            let y = (top + row * module + module / 2).min(height - 1);
            modules.push(dark(x, y));
        }
    }
    Ok(QrMatrix { size, modules })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma};
    use std::io::Cursor;

    // A 21x21 grid with the three finder patterns, drawn at `scale` pixels
    // per module with a four-module margin.
    fn finder_image(scale: u32) -> GrayImage {
        let grid = 21;
        let margin = 4;
        let side = (grid + margin * 2) * scale;
        let mut img = GrayImage::from_pixel(side, side, Luma([255]));
        let finder = |mx: u32, my: u32| -> bool {
            let corners = [(0, 0), (grid - 7, 0), (0, grid - 7)];
            corners.iter().any(|(cx, cy)| {
                if mx < *cx || my < *cy || mx >= cx + 7 || my >= cy + 7 {
                    return false;
                }
                let (dx, dy) = (mx - cx, my - cy);
                let ring = dx == 0 || dy == 0 || dx == 6 || dy == 6;
                let core = (2..=4).contains(&dx) && (2..=4).contains(&dy);
                ring || core
            })
        };
        for my in 0..grid {
            for mx in 0..grid {
                if finder(mx, my) {
                    for py in 0..scale {
                        for px in 0..scale {
                            img.put_pixel((mx + margin) * scale + px, (my + margin) * scale + py, Luma([0]));
                        }
                    }
                }
            }
        }
        img
    }

    #[test]
    fn recovers_module_grid() {
        let matrix = matrix_from_image(&finder_image(5)).unwrap();
        assert_eq!(matrix.size(), 21);
        assert!(matrix.is_dark(0, 0));
        assert!(!matrix.is_dark(1, 1));
        assert!(matrix.is_dark(3, 3));
        assert!(matrix.is_dark(20, 0));
        assert!(!matrix.is_dark(10, 10));
    }

    #[test]
    fn renders_half_blocks() {
        let matrix = matrix_from_image(&finder_image(3)).unwrap();
        let lines = matrix.render_lines();
        assert_eq!(lines.len(), matrix.width().div_ceil(2));
        assert!(lines.iter().all(|l| l.chars().count() == matrix.width()));
        // Row 2 holds module row 0 on top and module row 1 below.
        let row: Vec<char> = lines[1].chars().collect();
        assert_eq!(row[QUIET_ZONE], '█');
        assert_eq!(row[QUIET_ZONE + 1], '▀');
    }

    #[test]
    fn decodes_base64_png() {
        let img = finder_image(2);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));
        let matrix = matrix_from_base64(&payload).unwrap();
        assert_eq!(matrix.size(), 21);
    }

    #[test]
    fn blank_image_is_an_error() {
        let img = GrayImage::from_pixel(10, 10, Luma([255]));
        assert!(matrix_from_image(&img).is_err());
        assert!(matrix_from_base64("not base64!").is_err());
    }
}
