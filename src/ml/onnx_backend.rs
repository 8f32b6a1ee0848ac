//! ONNXモデルの推論（tract）

use std::io::Cursor;
use std::path::PathBuf;
use tract_onnx::prelude::*;
use tracing::debug;

use crate::error::{ClassifierError, Result};
use crate::ml::inference::{InferenceBackend, ModelLoader};
use crate::progress::ProgressSink;
use crate::types::{NormalizedTensor, TensorShape};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX成果物のローダー
///
/// 入力形状はモデル側で動的な場合があるため、設定値 `[1, C, S, S]` で固定します。
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    pub model_path: PathBuf,
    pub input_shape: TensorShape,
}

impl OnnxModelLoader {
    pub fn new(model_path: impl Into<PathBuf>, input_shape: TensorShape) -> Self {
        Self {
            model_path: model_path.into(),
            input_shape,
        }
    }

    fn build(&self, bytes: Vec<u8>, progress: &dyn ProgressSink) -> TractResult<OnnxBackend> {
        let shape = self.input_shape;
        let mut cursor = Cursor::new(bytes);
        let model = tract_onnx::onnx().model_for_read(&mut cursor)?;
        progress.report(0.6);

        let input_fact = TypedFact::dt_shape(
            f32::datum_type(),
            tvec!(1, shape.channels, shape.height, shape.width),
        );
        let typed = model.with_input_fact(0, input_fact.into())?.into_optimized()?;
        progress.report(0.9);

        // 出力形状が確定していればクラス数として使う
        let num_classes = typed
            .output_fact(0)?
            .shape
            .as_concrete()
            .and_then(|dims| dims.last().copied());

        let plan = typed.into_runnable()?;
        Ok(OnnxBackend {
            plan,
            input_shape: shape,
            num_classes,
        })
    }
}

impl ModelLoader for OnnxModelLoader {
    fn describe(&self) -> String {
        self.model_path.display().to_string()
    }

    fn load(&self, progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
        let bytes = std::fs::read(&self.model_path).map_err(|e| {
            ClassifierError::ModelLoad(format!("{}: {}", self.model_path.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(ClassifierError::ModelLoad(format!(
                "{}: file is empty",
                self.model_path.display()
            )));
        }
        progress.report(0.3);

        let backend = self.build(bytes, progress).map_err(|e| {
            ClassifierError::ModelLoad(format!("{}: {:?}", self.model_path.display(), e))
        })?;
        Ok(Box::new(backend))
    }
}

pub struct OnnxBackend {
    plan: OnnxPlan,
    input_shape: TensorShape,
    num_classes: Option<usize>,
}

impl OnnxBackend {
    fn run_plan(&self, tensor: &NormalizedTensor) -> TractResult<Vec<f32>> {
        let input = tract_ndarray::Array4::from_shape_vec(tensor.nchw(), tensor.as_slice().to_vec())?;
        let outputs = self.plan.run(tvec!(input.into_tensor().into()))?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow::anyhow!("model produced no outputs"))?;
        let view = output.to_array_view::<f32>()?;
        debug!("[onnx] 出力形状 {:?}", view.shape());
        Ok(view.iter().copied().collect())
    }
}

impl InferenceBackend for OnnxBackend {
    fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }

    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>> {
        self.run_plan(tensor)
            .map_err(|e| ClassifierError::Inference(format!("{:?}", e)))
    }
}
