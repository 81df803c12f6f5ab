//! Per-pixel opacity masks

use image::RgbaImage;

/// Per-pixel opacity in [0, 1], aligned 1:1 with a watermark frame
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl AlphaMask {
    /// Derives opacity from brightness, read from the first (red) channel over 255.
    ///
    /// Black turns fully transparent and white fully opaque, which is how a
    /// video without an alpha channel becomes a translucent overlay. Green and
    /// blue do not contribute, so the mask matches the red plane of the frame.
    pub fn from_luminance(image: &RgbaImage) -> Self {
        let values = image
            .as_raw()
            .chunks_exact(4)
            .map(|px| px[0] as f32 / 255.0)
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            values,
        }
    }

    /// Uses the image's own alpha channel as-is
    pub fn from_alpha_channel(image: &RgbaImage) -> Self {
        let values = image
            .as_raw()
            .chunks_exact(4)
            .map(|px| px[3] as f32 / 255.0)
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            values,
        }
    }

    /// Fully opaque mask
    pub fn opaque(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![1.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Opacity at (x, y)
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// One row of opacities
    pub fn row(&self, y: u32) -> &[f32] {
        let start = y as usize * self.width as usize;
        &self.values[start..start + self.width as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_luminance_maps_dark_to_transparent() {
        let mut image = RgbaImage::new(3, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        image.put_pixel(2, 0, Rgba([255, 0, 0, 255]));

        let mask = AlphaMask::from_luminance(&image);
        assert_eq!(mask.get(0, 0), 0.0);
        assert_eq!(mask.get(1, 0), 1.0);
        assert_eq!(mask.get(2, 0), 1.0);
    }

    #[test]
    fn test_luminance_reads_red_channel_only() {
        let mut image = RgbaImage::new(3, 1);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([0, 255, 255, 255]));
        image.put_pixel(2, 0, Rgba([51, 200, 10, 255]));

        let mask = AlphaMask::from_luminance(&image);
        assert_eq!(mask.get(0, 0), 1.0);
        assert_eq!(mask.get(1, 0), 0.0);
        assert!((mask.get(2, 0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_luminance_ignores_source_alpha() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 0]));
        let mask = AlphaMask::from_luminance(&image);
        assert!(mask.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_alpha_channel_is_used_as_is() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 51]));
        let mask = AlphaMask::from_alpha_channel(&image);
        assert_eq!(mask.row(0), &[1.0, 0.2]);
    }

    #[test]
    fn test_opaque_mask() {
        let mask = AlphaMask::opaque(4, 3);
        assert_eq!(mask.values().len(), 12);
        assert!(mask.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_derivation_is_bit_identical() {
        let image = RgbaImage::from_fn(16, 9, |x, y| Rgba([(x * 13) as u8, (y * 29) as u8, 77, 255]));
        assert_eq!(AlphaMask::from_luminance(&image), AlphaMask::from_luminance(&image));
    }
}
