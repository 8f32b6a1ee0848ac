//! 画像の前処理
//!
//! 任意サイズの画像をモデル入力 `channels × size × size` の `[0, 1]` テンソルに変換します。
//! 学習時の変換と一致させる必要があるため、以下の挙動は変更しないこと:
//! - アスペクト比を保たずに `size × size` へ直接リサイズする
//! - 255で割るだけで、平均・標準偏差による正規化はしない
//! - グレースケールは `0.299R + 0.587G + 0.114B`

use image::{imageops::FilterType, DynamicImage};
use tracing::debug;

use crate::error::{ClassifierError, Result};
use crate::types::{ChannelMode, NormalizedTensor, TensorShape};

/// 前処理の設定（有効なモデルの入力契約）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// 入力画像サイズ（正方形）
    pub target_size: u32,
    pub channel_mode: ChannelMode,
}

impl PreprocessConfig {
    pub fn new(target_size: u32, channel_mode: ChannelMode) -> Self {
        Self {
            target_size,
            channel_mode,
        }
    }

    pub fn shape(&self) -> TensorShape {
        TensorShape::square(self.channel_mode.channels(), self.target_size as usize)
    }
}

/// 輝度（0〜255）
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// 画像をモデル入力テンソルに変換
///
/// 元画像は変更しません。
pub fn normalize(
    image: &DynamicImage,
    target_size: u32,
    channel_mode: ChannelMode,
) -> Result<NormalizedTensor> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifierError::Decode(format!(
            "image has zero dimensions: {}x{}",
            image.width(),
            image.height()
        )));
    }
    if target_size == 0 {
        return Err(ClassifierError::InvalidArgument(
            "target size must be positive".to_string(),
        ));
    }

    debug!(
        "[preprocess] {}x{} -> {}x{} ({})",
        image.width(),
        image.height(),
        target_size,
        target_size,
        channel_mode
    );

    let rgb = image
        .resize_exact(target_size, target_size, FilterType::Triangle)
        .to_rgb8();

    let size = target_size as usize;
    let plane = size * size;
    let shape = TensorShape::square(channel_mode.channels(), size);
    let mut data = vec![0.0f32; shape.len()];

    match channel_mode {
        ChannelMode::Grayscale => {
            for (i, pixel) in rgb.pixels().enumerate() {
                let [r, g, b] = pixel.0;
                data[i] = luminance(r, g, b) / 255.0;
            }
        }
        ChannelMode::Rgb => {
            // [R][G][B] のプレーナ配置
            for (i, pixel) in rgb.pixels().enumerate() {
                for channel in 0..3 {
                    data[channel * plane + i] = pixel[channel] as f32 / 255.0;
                }
            }
        }
    }

    Ok(NormalizedTensor::new(shape, data))
}

/// 設定値を使って変換
pub fn normalize_with(image: &DynamicImage, config: &PreprocessConfig) -> Result<NormalizedTensor> {
    normalize(image, config.target_size, config.channel_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_red_to_grayscale() {
        let image = solid(256, 256, [255, 0, 0]);
        let tensor = normalize(&image, 128, ChannelMode::Grayscale).unwrap();

        assert_eq!(tensor.shape(), TensorShape::square(1, 128));
        for &v in tensor.as_slice() {
            assert!((v - 0.299).abs() < 1e-3, "value {}", v);
        }
    }

    #[test]
    fn test_rgb_planar_layout() {
        let image = solid(100, 100, [255, 0, 51]);
        let tensor = normalize(&image, 64, ChannelMode::Rgb).unwrap();
        let data = tensor.as_slice();
        let plane = 64 * 64;

        assert_eq!(data.len(), 3 * plane);
        assert!(data[..plane].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(data[plane..2 * plane].iter().all(|&v| v.abs() < 1e-6));
        assert!(data[2 * plane..].iter().all(|&v| (v - 0.2).abs() < 1e-3));
    }

    #[test]
    fn test_stretch_without_aspect_preservation() {
        // 左半分が白、右半分が黒の横長画像
        let mut img = ImageBuffer::from_pixel(200, 50, Rgb([0u8, 0, 0]));
        for y in 0..50 {
            for x in 0..100 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let tensor = normalize(&DynamicImage::ImageRgb8(img), 32, ChannelMode::Grayscale).unwrap();
        let data = tensor.as_slice();

        // 上下の余白（パディング）は入らず、全行で左端が白・右端が黒
        for row in 0..32 {
            assert!(data[row * 32] > 0.99);
            assert!(data[row * 32 + 31] < 0.01);
        }
    }

    #[test]
    fn test_values_in_unit_range() {
        let mut img = ImageBuffer::new(37, 91);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 7) as u8, (y * 3) as u8, (x + y) as u8, (x * y) as u8]);
        }
        let image = DynamicImage::ImageRgba8(img);

        for mode in [ChannelMode::Grayscale, ChannelMode::Rgb] {
            let tensor = normalize(&image, 224, mode).unwrap();
            assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_source_is_not_mutated() {
        let image = solid(10, 20, [1, 2, 3]);
        let before = image.clone();
        let _ = normalize(&image, 8, ChannelMode::Rgb).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn test_deterministic() {
        let image = solid(33, 17, [90, 120, 200]);
        let a = normalize(&image, 128, ChannelMode::Rgb).unwrap();
        let b = normalize(&image, 128, ChannelMode::Rgb).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_dimensions_fail() {
        let image = DynamicImage::new_rgb8(0, 0);
        let err = normalize(&image, 128, ChannelMode::Grayscale).unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }

    #[test]
    fn test_configured_sizes() {
        let image = solid(300, 200, [10, 10, 10]);
        for size in [128, 224, 256] {
            let config = PreprocessConfig::new(size, ChannelMode::Rgb);
            let tensor = normalize_with(&image, &config).unwrap();
            assert_eq!(tensor.shape(), config.shape());
        }
    }
}
