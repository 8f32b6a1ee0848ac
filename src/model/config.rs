//! アプリケーション設定管理モジュール
//!
//! モデル成果物・入力契約・ラベル表・推論パラメータをJSON形式で保存・読み込みします。
//! モデルを差し替えるときは、この設定だけを変更します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ClassifierError, Result};
use crate::ml::inference::EngineTimeouts;
use crate::ml::preprocess::PreprocessConfig;
use crate::ml::scores::ScoreSemantics;
use crate::types::ChannelMode;

/// 計算デバイスの種類（Burnバックエンド用）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 推論バックエンドの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNXモデル（tract）
    #[default]
    Onnx,
    /// tar.gzアーカイブのBurnモデル
    Burn,
    /// HTTPの推論サーバー
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Onnx => write!(f, "onnx"),
            BackendKind::Burn => write!(f, "burn"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub backend: BackendKind,
    /// 使用するモデルファイルのパス
    pub model_path: String,
    /// 入力画像サイズ（正方形）
    pub input_size: u32,
    pub channel_mode: ChannelMode,
    /// 出力の意味（自動判定 / 確率 / ロジット）
    #[serde(default)]
    pub score_semantics: ScoreSemantics,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Onnx,
            model_path: "models/efficientnet_b0_best.onnx".to_string(),
            input_size: 256,
            channel_mode: ChannelMode::Grayscale,
            score_semantics: ScoreSemantics::Auto,
        }
    }
}

/// ラベル表の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSettings {
    pub path: String,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            path: "models/mappings.csv".to_string(),
        }
    }
}

/// リモート推論の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// `/predict` のURL
    pub endpoint: String,
    /// サーバー側モデルのクラス数
    pub num_classes: usize,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/predict".to_string(),
            num_classes: 0,
        }
    }
}

/// 推論パラメータ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// 返す予測の件数
    pub top_k: usize,
    /// モデル読み込みの制限時間（秒、未指定なら無制限）
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
    /// 1回の推論の制限時間（秒、未指定なら無制限）
    #[serde(default)]
    pub infer_timeout_secs: Option<u64>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            load_timeout_secs: None,
            infer_timeout_secs: None,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// ラベル表設定
    #[serde(default)]
    pub labels: LabelSettings,
    /// 推論設定
    #[serde(default)]
    pub inference: InferenceSettings,
    /// リモート推論設定
    #[serde(default)]
    pub remote: RemoteSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        if self.model.input_size == 0 {
            return Err(ClassifierError::Config(
                "model.input_size must be positive".to_string(),
            ));
        }
        if self.model.backend == BackendKind::Remote {
            if self.remote.endpoint.trim().is_empty() {
                return Err(ClassifierError::Config(
                    "remote.endpoint must not be empty".to_string(),
                ));
            }
            if self.remote.num_classes == 0 {
                return Err(ClassifierError::Config(
                    "remote.num_classes must be positive".to_string(),
                ));
            }
        } else if self.model.model_path.trim().is_empty() {
            return Err(ClassifierError::Config(
                "model.model_path must not be empty".to_string(),
            ));
        }
        if self.inference.top_k == 0 {
            return Err(ClassifierError::Config(
                "inference.top_k must be positive".to_string(),
            ));
        }
        if self.inference.load_timeout_secs == Some(0) || self.inference.infer_timeout_secs == Some(0)
        {
            return Err(ClassifierError::Config(
                "timeouts must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn preprocess(&self) -> PreprocessConfig {
        PreprocessConfig::new(self.model.input_size, self.model.channel_mode)
    }

    pub fn timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            load: self.inference.load_timeout_secs.map(Duration::from_secs),
            infer: self.inference.infer_timeout_secs.map(Duration::from_secs),
        }
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        info!(
            "モデル: {} ({}), 入力 {}x{} {}, 出力 {:?}",
            self.model.model_path,
            self.model.backend,
            self.model.input_size,
            self.model.input_size,
            self.model.channel_mode,
            self.model.score_semantics
        );
        info!(
            "ラベル表: {}, top_k: {}, 計算デバイス: {}",
            self.labels.path, self.inference.top_k, self.device_type
        );
    }
}
