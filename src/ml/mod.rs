pub mod preprocess;
pub mod scores;
pub mod inference;

#[cfg(feature = "onnx")]
pub mod onnx_backend;

#[cfg(feature = "remote")]
pub mod remote_backend;

#[cfg(feature = "burn")]
pub mod ml_model;
#[cfg(feature = "burn")]
pub mod burn_backend;

pub use preprocess::{normalize, normalize_with, PreprocessConfig};
pub use scores::{interpret, interpret_as, rank, Ranking, ScoreSemantics};
pub use inference::{EngineTimeouts, InferenceBackend, InferenceEngine, ModelLoader};

#[cfg(feature = "onnx")]
pub use onnx_backend::OnnxModelLoader;
#[cfg(feature = "burn")]
pub use burn_backend::BurnModelLoader;
#[cfg(feature = "remote")]
pub use remote_backend::RemoteModelLoader;
