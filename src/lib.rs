//! 結合文字（যুক্তবর্ণ）画像分類ライブラリ
//!
//! 学習済みモデルとラベル表を一度だけ読み込み、画像ごとに上位K件の予測を返します。

pub mod error;
pub mod types;
pub mod label_table;
pub mod image_source;
pub mod progress;
pub mod ml;
pub mod model;
pub mod pipeline;

pub use error::{ClassifierError, Result};
pub use image_source::ImageSource;
pub use label_table::{LabelStore, LabelTable};
pub use model::config::AppConfig;
pub use pipeline::Classifier;
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use types::{
    ChannelMode, ClassificationResult, LabelMappingEntry, NormalizedTensor, RankedPrediction,
    RawScores, TensorShape,
};
