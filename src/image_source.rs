//! 入力画像の取得元
//!
//! アップロード・カメラ・手書きキャンバスのいずれから来た画像も、
//! ここでデコード済みの `DynamicImage` に揃えます。

use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;
use std::path::PathBuf;

use crate::error::{ClassifierError, Result};

#[derive(Debug, Clone)]
pub enum ImageSource {
    /// エンコード済みの画像バイト列（PNG / JPEG など）
    Bytes(Vec<u8>),
    /// 画像ファイルのパス
    Path(PathBuf),
    /// `data:image/png;base64,...` 形式（カメラ・キャンバスの出力）
    DataUrl(String),
    /// デコード済みの画像
    Decoded(DynamicImage),
}

impl ImageSource {
    /// 文字列引数から取得元を判定（`data:` で始まればData URL、それ以外はパス）
    pub fn parse(arg: &str) -> Self {
        if arg.starts_with("data:") {
            ImageSource::DataUrl(arg.to_string())
        } else {
            ImageSource::Path(PathBuf::from(arg))
        }
    }

    pub fn decode(self) -> Result<DynamicImage> {
        let image = match self {
            ImageSource::Bytes(bytes) => decode_bytes(&bytes)?,
            ImageSource::Path(path) => {
                let bytes = std::fs::read(&path).map_err(|e| {
                    ClassifierError::Decode(format!("cannot read {}: {}", path.display(), e))
                })?;
                decode_bytes(&bytes)?
            }
            ImageSource::DataUrl(url) => decode_bytes(&data_url_to_bytes(&url)?)?,
            ImageSource::Decoded(image) => image,
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::Decode(format!(
                "image has zero dimensions: {}x{}",
                image.width(),
                image.height()
            )));
        }

        Ok(image)
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Decoded(image)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(ClassifierError::Decode("empty image data".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| ClassifierError::Decode(e.to_string()))
}

/// Data URLのペイロード部分をbase64デコード
fn data_url_to_bytes(url: &str) -> Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ClassifierError::Decode("not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ClassifierError::Decode("data URL has no payload".to_string()))?;

    if !meta.ends_with(";base64") {
        return Err(ClassifierError::Decode(format!(
            "unsupported data URL encoding: {}",
            meta
        )));
    }

    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ClassifierError::Decode(format!("invalid base64 payload: {}", e)))
}
