use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::Array4;
use std::io::Cursor;
use std::path::Path;

use crate::config::{ConfigError, ModelConfig};

/// NHWC input tensor with a leading batch dimension of one.
pub type Tensor = Array4<f32>;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes images into the fixed-size, `[0, 1]`-scaled RGB tensor the
/// classifier was trained on.
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(64, 64, FilterType::Nearest)
    }
}

impl ImageNormalizer {
    pub fn new(width: u32, height: u32, filter: FilterType) -> Self {
        Self {
            width,
            height,
            filter,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self, ConfigError> {
        let (width, height) = config.input_size();
        Ok(Self::new(width, height, config.resize_filter()?))
    }

    /// Shape of the tensors this normalizer produces.
    pub fn output_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    pub fn normalize_bytes(&self, image_data: &[u8]) -> Result<Tensor, DecodeError> {
        let img = ImageReader::new(Cursor::new(image_data))
            .with_guessed_format()?
            .decode()?;
        Ok(self.to_tensor(&img))
    }

    /// The format is sniffed from the file content, never from its extension.
    pub fn normalize_file(&self, path: &Path) -> Result<Tensor, DecodeError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.to_tensor(&img))
    }

    fn to_tensor(&self, img: &DynamicImage) -> Tensor {
        let rgb = img
            .resize_exact(self.width, self.height, self.filter)
            .to_rgb8();
        Array4::from_shape_fn(
            (1, self.height as usize, self.width as usize, 3),
            |(_, y, x, c)| rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    #[test]
    fn produces_batched_64x64_rgb_tensor() {
        let img = RgbImage::from_fn(130, 90, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 7]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let tensor = ImageNormalizer::default().normalize_bytes(&bytes).unwrap();

        assert_eq!(tensor.shape(), &[1, 64, 64, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn scales_channel_values_by_255() {
        let img = RgbImage::from_pixel(64, 64, Rgb([255, 0, 51]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let tensor = ImageNormalizer::default().normalize_bytes(&bytes).unwrap();

        assert_eq!(tensor[[0, 10, 20, 0]], 1.0);
        assert_eq!(tensor[[0, 10, 20, 1]], 0.0);
        assert!((tensor[[0, 10, 20, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let img = RgbaImage::from_pixel(32, 32, Rgba([10, 20, 30, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let tensor = ImageNormalizer::default().normalize_bytes(&bytes).unwrap();

        assert_eq!(tensor.shape(), &[1, 64, 64, 3]);
    }

    #[test]
    fn same_bytes_give_same_tensor() {
        let img = RgbImage::from_fn(100, 100, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, 128]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let normalizer = ImageNormalizer::default();

        assert_eq!(
            normalizer.normalize_bytes(&bytes).unwrap(),
            normalizer.normalize_bytes(&bytes).unwrap()
        );
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = ImageNormalizer::default()
            .normalize_bytes(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn file_format_is_sniffed_not_taken_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabelled.jpg");
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        std::fs::write(&path, encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)).unwrap();

        let tensor = ImageNormalizer::default().normalize_file(&path).unwrap();

        assert_eq!(tensor.shape(), &[1, 64, 64, 3]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageNormalizer::default()
            .normalize_file(&dir.path().join("gone.png"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn honours_configured_geometry() {
        let mut config = ModelConfig::default();
        config.image.size = vec![32, 16];
        let normalizer = ImageNormalizer::from_config(&config).unwrap();
        let bytes = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([9, 9, 9]))),
            ImageFormat::Png,
        );

        let tensor = normalizer.normalize_bytes(&bytes).unwrap();

        assert_eq!(tensor.shape(), &[1, 16, 32, 3]);
        assert_eq!(normalizer.output_shape(), [1, 16, 32, 3]);
    }
}
