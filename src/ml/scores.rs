//! モデル出力の解釈と順位付け

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::label_table::LabelTable;
use crate::types::{ClassificationResult, RankedPrediction};

/// 合計がこの範囲で1.0に近ければ、確率としてそのまま扱う
pub const PROBABILITY_SUM_TOLERANCE: f32 = 0.1;

/// モデル出力の意味
///
/// 最終層にSoftmaxを含むモデルと含まないモデルが混在するため、既定は `Auto`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSemantics {
    /// 合計値から毎回判定する
    #[default]
    Auto,
    /// 確率としてそのまま使う
    Probabilities,
    /// ロジットとしてSoftmaxを適用する
    Logits,
}

/// 合計が1.0 ± 0.1 なら確率とみなす
pub fn looks_like_probabilities(raw: &[f32]) -> bool {
    let sum: f64 = raw.iter().map(|&v| v as f64).sum();
    (sum - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE as f64
}

/// 数値的に安定なSoftmax（最大値を引いてからexp）
///
/// 有限でない値は確率0とし、残りの有限値だけで正規化します。
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max_val = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max_val.is_finite() {
        return vec![0.0; values.len()];
    }
    let exps: Vec<f32> = values
        .iter()
        .map(|&v| if v.is_finite() { (v - max_val).exp() } else { 0.0 })
        .collect();
    // 最大値の項が1.0なので合計は必ず1以上
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// 生スコアを確率に揃える（自動判定）
pub fn interpret(raw: &[f32]) -> Vec<f32> {
    interpret_as(raw, ScoreSemantics::Auto)
}

pub fn interpret_as(raw: &[f32], semantics: ScoreSemantics) -> Vec<f32> {
    debug_assert!(!raw.is_empty(), "empty score vector");
    let already_normalized = match semantics {
        ScoreSemantics::Auto => looks_like_probabilities(raw),
        ScoreSemantics::Probabilities => true,
        ScoreSemantics::Logits => false,
    };

    if already_normalized {
        raw.to_vec()
    } else {
        softmax(raw)
    }
}

/// 順位付けされた上位K件（常に1件以上）
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    predictions: Vec<RankedPrediction>,
}

impl Ranking {
    /// 最上位の予測
    pub fn best(&self) -> &RankedPrediction {
        &self.predictions[0]
    }

    pub fn predictions(&self) -> &[RankedPrediction] {
        &self.predictions
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn into_result(self) -> ClassificationResult {
        let best = self.best().clone();
        ClassificationResult {
            class_index: best.class_index,
            display_label: best.display_label,
            description: best.description,
            confidence: best.confidence,
            predictions: self.predictions,
        }
    }
}

/// 信頼度の降順（同値はクラス番号の昇順）に並べ、上位 `top_k` 件をラベルと結合
///
/// `top_k` がクラス数を超える場合はクラス数に切り詰めます。
pub fn rank(scores: &[f32], labels: &LabelTable, top_k: usize) -> Result<Ranking> {
    if top_k == 0 {
        return Err(ClassifierError::InvalidArgument(
            "top_k must be positive".to_string(),
        ));
    }
    if scores.is_empty() {
        return Err(ClassifierError::InvalidArgument(
            "score vector is empty".to_string(),
        ));
    }

    let mut indexed: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .map(|(idx, &score)| (idx, sort_key(score)))
        .collect();

    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed.truncate(top_k.min(scores.len()));

    let predictions = indexed
        .into_iter()
        .map(|(class_index, key)| {
            let entry = labels.entry_or_fallback(class_index);
            RankedPrediction {
                class_index,
                display_label: entry.display_label,
                description: entry.description,
                group: entry.group,
                confidence: clamp_confidence(key),
            }
        })
        .collect();

    Ok(Ranking { predictions })
}

/// 並べ替え用の値（NaNは最下位）
fn sort_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// 信頼度は[0, 1]に丸める（NaN由来の-∞は0）
fn clamp_confidence(key: f32) -> f32 {
    key.clamp(0.0, 1.0)
}
