//! モデルアーカイブのメタデータ
//!
//! 推論側はこの値だけを見て入力形状と出力クラス数を決めます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::scores::ScoreSemantics;
use crate::types::{ChannelMode, TensorShape};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力クラス数
    pub num_classes: usize,

    /// 入力チャンネル数（1 または 3）
    pub input_channels: usize,

    /// モデル入力サイズ（正方形）
    pub model_input_size: u32,

    /// 出力の意味（未指定なら自動判定）
    #[serde(default)]
    pub score_semantics: ScoreSemantics,

    /// クラスラベル（任意、診断用）
    #[serde(default)]
    pub class_labels: Vec<String>,

    /// モデルの学習時刻（ISO8601形式、任意）
    #[serde(default)]
    pub trained_at: Option<String>,
}

impl ModelMetadata {
    pub fn new(num_classes: usize, channel_mode: ChannelMode, model_input_size: u32) -> Self {
        Self {
            num_classes,
            input_channels: channel_mode.channels(),
            model_input_size,
            score_semantics: ScoreSemantics::Auto,
            class_labels: Vec::new(),
            trained_at: None,
        }
    }

    pub fn channel_mode(&self) -> Option<ChannelMode> {
        ChannelMode::from_channels(self.input_channels)
    }

    pub fn input_shape(&self) -> TensorShape {
        TensorShape::square(self.input_channels, self.model_input_size as usize)
    }

    /// ログ用の概要（入力形状・クラス数・学習時刻・ラベル例）
    pub fn summary(&self) -> String {
        let mut text = format!(
            "入力 {}, クラス数 {}, 出力 {:?}",
            self.input_shape(),
            self.num_classes,
            self.score_semantics
        );
        if let Some(trained_at) = &self.trained_at {
            text.push_str(&format!(", 学習日時 {}", trained_at));
        }
        if !self.class_labels.is_empty() {
            let head: Vec<&str> = self.class_labels.iter().take(3).map(String::as_str).collect();
            text.push_str(&format!(", ラベル [{}", head.join(", ")));
            if self.class_labels.len() > head.len() {
                text.push_str(", ...");
            }
            text.push(']');
        }
        text
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mentions_optional_fields() {
        let mut metadata = ModelMetadata::new(4, ChannelMode::Grayscale, 64);
        assert_eq!(metadata.summary(), "入力 [1, 64, 64], クラス数 4, 出力 Auto");

        metadata.trained_at = Some("2025-01-02T03:04:05Z".to_string());
        metadata.class_labels = vec!["ক্ক".into(), "ক্ট".into(), "ক্ত".into(), "ক্ষ".into()];
        let summary = metadata.summary();
        assert!(summary.contains("学習日時 2025-01-02T03:04:05Z"));
        assert!(summary.ends_with("ラベル [ক্ক, ক্ট, ক্ত, ...]"));
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{"num_classes": 171, "input_channels": 1, "model_input_size": 128}"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert_eq!(metadata.score_semantics, ScoreSemantics::Auto);
        assert_eq!(metadata.channel_mode(), Some(ChannelMode::Grayscale));
        assert_eq!(metadata.input_shape(), TensorShape::square(1, 128));
        assert!(metadata.class_labels.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(ModelMetadata::from_json_string("{").is_err());
    }
}
