//! Burn版モデルの推論
//!
//! `.tar.gz` アーカイブのメタデータから入力形状とクラス数を決め、重みを復元します。

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use crate::error::{ClassifierError, Result};
use crate::ml::inference::{InferenceBackend, ModelLoader};
use crate::ml::scores::ScoreSemantics;
use crate::ml::ml_model::{JuktobornoClassifier, ModelConfig, MIN_INPUT_SIZE};
use crate::model::config::DeviceType;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::load_model_with_metadata;
use crate::progress::ProgressSink;
use crate::types::{NormalizedTensor, TensorShape};

/// モデルアーカイブのローダー
#[derive(Debug, Clone)]
pub struct BurnModelLoader {
    pub archive_path: PathBuf,
    pub device_type: DeviceType,
}

impl BurnModelLoader {
    pub fn new(archive_path: impl Into<PathBuf>, device_type: DeviceType) -> Self {
        Self {
            archive_path: archive_path.into(),
            device_type,
        }
    }
}

impl ModelLoader for BurnModelLoader {
    fn describe(&self) -> String {
        format!("{} ({})", self.archive_path.display(), self.device_type)
    }

    fn load(&self, progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
        let (metadata, model_binary) = load_model_with_metadata(&self.archive_path)
            .map_err(|e| ClassifierError::ModelLoad(format!("{:#}", e)))?;
        progress.report(0.3);

        validate_metadata(&metadata)?;
        info!("[burn] {}: {}", self.archive_path.display(), metadata.summary());

        let backend: Box<dyn InferenceBackend> = match self.device_type {
            DeviceType::Cpu => Box::new(BurnBackend::<burn_ndarray::NdArray>::from_record(
                &metadata,
                model_binary,
                Default::default(),
            )?),
            #[cfg(feature = "wgpu")]
            DeviceType::Wgpu => Box::new(BurnBackend::<burn::backend::Wgpu>::from_record(
                &metadata,
                model_binary,
                Default::default(),
            )?),
            #[cfg(not(feature = "wgpu"))]
            DeviceType::Wgpu => {
                return Err(ClassifierError::ModelLoad(
                    "wgpu device requested but the `wgpu` feature is not enabled".to_string(),
                ))
            }
        };
        progress.report(0.9);

        Ok(backend)
    }
}

fn validate_metadata(metadata: &ModelMetadata) -> Result<()> {
    if metadata.channel_mode().is_none() {
        return Err(ClassifierError::ModelLoad(format!(
            "unsupported input channel count: {}",
            metadata.input_channels
        )));
    }
    if (metadata.model_input_size as usize) < MIN_INPUT_SIZE {
        return Err(ClassifierError::ModelLoad(format!(
            "model input size {} is smaller than {}",
            metadata.model_input_size, MIN_INPUT_SIZE
        )));
    }
    if metadata.num_classes == 0 {
        return Err(ClassifierError::ModelLoad("model has no classes".to_string()));
    }
    if !metadata.class_labels.is_empty() && metadata.class_labels.len() != metadata.num_classes {
        return Err(ClassifierError::ModelLoad(format!(
            "metadata lists {} class labels for {} classes",
            metadata.class_labels.len(),
            metadata.num_classes
        )));
    }
    Ok(())
}

/// 復元済みのBurnモデル
///
/// Burnのモジュールは `Sync` とは限らないため `Mutex` で保護します。
pub struct BurnBackend<B: Backend> {
    model: Mutex<JuktobornoClassifier<B>>,
    device: B::Device,
    input_shape: TensorShape,
    num_classes: usize,
    score_semantics: ScoreSemantics,
}

impl<B: Backend> BurnBackend<B> {
    pub fn from_record(
        metadata: &ModelMetadata,
        model_binary: Vec<u8>,
        device: B::Device,
    ) -> Result<Self> {
        let model_config = ModelConfig::new(metadata.num_classes)
            .with_in_channels(metadata.input_channels)
            .with_image_size(metadata.model_input_size as usize);
        let model = model_config.init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| ClassifierError::ModelLoad(format!("invalid model weights: {:?}", e)))?;
        let model = model.load_record(record);

        Ok(Self {
            model: Mutex::new(model),
            device,
            input_shape: metadata.input_shape(),
            num_classes: metadata.num_classes,
            score_semantics: metadata.score_semantics,
        })
    }
}

impl<B: Backend> InferenceBackend for BurnBackend<B> {
    fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    fn score_semantics(&self) -> Option<ScoreSemantics> {
        match self.score_semantics {
            ScoreSemantics::Auto => None,
            declared => Some(declared),
        }
    }

    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>> {
        let input = Tensor::<B, 1>::from_floats(tensor.as_slice(), &self.device)
            .reshape(tensor.nchw());

        let model = self
            .model
            .lock()
            .map_err(|_| ClassifierError::Inference("model lock poisoned".to_string()))?;
        let output = model.forward(input);

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("推論結果の取得エラー: {:?}", e)))
    }
}
