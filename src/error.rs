//! 分類パイプラインのエラー定義

use std::time::Duration;
use thiserror::Error;

use crate::types::TensorShape;

/// パイプラインの各段階が返すエラー
///
/// ラベル未登録のクラスやスコアの正規化判定はエラーではなく、
/// それぞれの段階でフォールバックとして処理されます。
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// ラベル表が読めない、または全く解析できない
    #[error("failed to load label table from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    /// モデル成果物が見つからない、または壊れている
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// 入力画像をデコードできない
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// テンソル形状がモデルの入力形状と一致しない
    #[error("tensor shape {actual} does not match model input shape {expected}")]
    ShapeMismatch {
        expected: TensorShape,
        actual: TensorShape,
    },

    /// load完了前に推論が要求された
    #[error("model is not loaded; call load() first")]
    NotLoaded,

    /// 呼び出し側の契約違反（top_k = 0 など）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// load / infer が制限時間を超えた
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// 推論バックエンドの実行時エラー
    #[error("inference failed: {0}")]
    Inference(String),

    /// 設定値が不正
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

impl ClassifierError {
    pub(crate) fn load(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}
