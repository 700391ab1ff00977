use crate::error::{Error, Result};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Largest accepted output side
pub const MAX_IMAGE_SIZE: u32 = 4096;

/// Resize and normalization applied to every slice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageTransform {
    /// Side of the square output image
    pub size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self::new(224)
    }
}

impl ImageTransform {
    /// ImageNet-normalized transform to a `size` x `size` image
    pub fn new(size: u32) -> Self {
        Self {
            size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Reject a zero side or one above [`MAX_IMAGE_SIZE`]
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size > MAX_IMAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "image size must be in 1..={}, got {}",
                MAX_IMAGE_SIZE, self.size
            )));
        }
        if self.std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "normalization std must be positive, got {:?}",
                self.std
            )));
        }
        Ok(())
    }

    /// Output shape `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        let side = self.size as usize;
        [3, side, side]
    }

    /// Number of values in one transformed image
    pub fn num_values(&self) -> usize {
        self.shape().iter().product()
    }

    /// Zero image used in place of an absent slice
    pub fn placeholder(&self) -> ImagePixels {
        ImagePixels {
            data: vec![0.0; self.num_values()],
            shape: self.shape(),
        }
    }

    /// Resize, scale to `[0, 1]` and normalize a decoded RGB image into CHW layout
    pub fn apply(&self, rgb: &image::RgbImage) -> ImagePixels {
        let resized = image::imageops::resize(rgb, self.size, self.size, FilterType::Triangle);
        let side = self.size as usize;
        let plane = side * side;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                data[c * plane + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        ImagePixels {
            data,
            shape: self.shape(),
        }
    }
}

/// A transformed image, CHW `f32`
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePixels {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

/// Decode an image file as RGB and apply the transform
pub fn load_image(path: &Path, transform: &ImageTransform) -> Result<ImagePixels> {
    let decoded = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(transform.apply(&decoded.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_image_size_bounds() {
        assert!(ImageTransform::default().validate().is_ok());
        assert!(ImageTransform::new(1).validate().is_ok());
        assert!(ImageTransform::new(MAX_IMAGE_SIZE).validate().is_ok());
        assert!(matches!(ImageTransform::new(0).validate(), Err(Error::InvalidConfig(_))));
        assert!(matches!(ImageTransform::new(70_000).validate(), Err(Error::InvalidConfig(_))));

        let flat = ImageTransform { std: [0.2, 0.0, 0.2], ..ImageTransform::default() };
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_transform_layout_and_normalization() {
        let transform = ImageTransform::new(8);
        let white = image::RgbImage::from_pixel(16, 4, image::Rgb([255, 255, 255]));
        let pixels = transform.apply(&white);

        assert_eq!(pixels.shape, [3, 8, 8]);
        assert_eq!(pixels.data.len(), 3 * 64);
        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((pixels.data[c * 64] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_placeholder_is_zero() {
        let placeholder = ImageTransform::default().placeholder();
        assert_eq!(placeholder.shape, [3, 224, 224]);
        assert!(placeholder.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_load_grayscale_as_rgb() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slice.png");
        image::GrayImage::new(5, 5).save(&path).unwrap();

        let pixels = load_image(&path, &ImageTransform::new(4)).unwrap();
        assert_eq!(pixels.shape, [3, 4, 4]);
    }

    #[test]
    fn test_corrupt_file_is_image_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let err = load_image(&path, &ImageTransform::new(4)).unwrap_err();
        assert!(matches!(err, Error::Image { .. }));
    }
}
