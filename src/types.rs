use serde::{Deserialize, Serialize};
use std::fmt;

/// ラベル表の1行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMappingEntry {
    pub class_index: usize,
    /// 表示用の結合文字（例: "ক্ষ"）
    pub display_label: String,
    pub description: String,
    /// 学習データのフォルダ名など、表示・診断用のタグ
    pub group: String,
}

impl LabelMappingEntry {
    /// ラベル表に存在しないクラス用の代替エントリ
    pub fn fallback(class_index: usize) -> Self {
        Self {
            class_index,
            display_label: format!("Class {}", class_index),
            description: String::new(),
            group: String::new(),
        }
    }
}

/// モデル入力のチャンネル構成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// 輝度 1チャンネル
    Grayscale,
    /// RGB 3チャンネル（プレーナ配置）
    Rgb,
}

impl ChannelMode {
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Grayscale => 1,
            ChannelMode::Rgb => 3,
        }
    }

    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(ChannelMode::Grayscale),
            3 => Some(ChannelMode::Rgb),
            _ => None,
        }
    }
}

impl Default for ChannelMode {
    fn default() -> Self {
        ChannelMode::Grayscale
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Grayscale => write!(f, "grayscale"),
            ChannelMode::Rgb => write!(f, "rgb"),
        }
    }
}

/// テンソル形状 (channels, height, width)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorShape {
    pub fn square(channels: usize, size: usize) -> Self {
        Self {
            channels,
            height: size,
            width: size,
        }
    }

    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.channels, self.height, self.width)
    }
}

/// 正規化済みのモデル入力
///
/// 値はすべて `[0, 1]`。`channels == 3` の場合は `[R][G][B]` のプレーナ配置。
/// 生成後は変更できず、1回の推論で消費されます。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl NormalizedTensor {
    pub(crate) fn new(shape: TensorShape, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.len(), data.len());
        Self { shape, data }
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// バッチ次元を付けたNCHW形状
    pub fn nchw(&self) -> [usize; 4] {
        [1, self.shape.channels, self.shape.height, self.shape.width]
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// モデルの生出力（インデックス = クラス番号）
///
/// 確率分布である保証はありません。
#[derive(Debug, Clone, PartialEq)]
pub struct RawScores(pub Vec<f32>);

impl RawScores {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 順位付けされた予測1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub class_index: usize,
    pub display_label: String,
    pub description: String,
    pub group: String,
    pub confidence: f32,
}

/// 表示層に渡す分類結果
///
/// 先頭の予測を主結果としてトップレベルに展開し、
/// `predictions` に上位K件をそのまま保持します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub class_index: usize,
    pub display_label: String,
    pub description: String,
    pub confidence: f32,
    pub predictions: Vec<RankedPrediction>,
}
