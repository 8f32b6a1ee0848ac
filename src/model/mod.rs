pub mod config;

#[cfg(feature = "burn")]
pub mod model_metadata;
#[cfg(feature = "burn")]
pub mod model_storage;

pub use config::{AppConfig, BackendKind, DeviceType, InferenceSettings, LabelSettings, ModelSettings, RemoteSettings};

#[cfg(feature = "burn")]
pub use model_metadata::ModelMetadata;
#[cfg(feature = "burn")]
pub use model_storage::{load_model_with_metadata, save_model_with_metadata};
