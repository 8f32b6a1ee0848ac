//! 分類パイプライン
//!
//! 画像デコード → 前処理 → 推論 → スコア解釈 → 順位付け を順に実行します。
//! モデルとラベル表は `Classifier` が所有し、全リクエストで読み取り専用に共有されます。

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{ClassifierError, Result};
use crate::image_source::ImageSource;
use crate::label_table::LabelStore;
use crate::ml::inference::{InferenceEngine, ModelLoader};
use crate::ml::preprocess::{normalize_with, PreprocessConfig};
use crate::ml::scores::{interpret_as, rank, ScoreSemantics};
use crate::model::config::{AppConfig, BackendKind};
use crate::progress::{Monotonic, ProgressSink, Scaled};
use crate::types::ClassificationResult;

/// 進捗のうちモデル読み込みに割り当てる範囲
const MODEL_PROGRESS_END: f32 = 0.7;

pub struct Classifier {
    engine: InferenceEngine,
    labels: LabelStore,
    preprocess: PreprocessConfig,
    score_semantics: ScoreSemantics,
    default_top_k: usize,
}

impl Classifier {
    pub fn new(
        engine: InferenceEngine,
        labels: LabelStore,
        preprocess: PreprocessConfig,
        score_semantics: ScoreSemantics,
        default_top_k: usize,
    ) -> Self {
        Self {
            engine,
            labels,
            preprocess,
            score_semantics,
            default_top_k,
        }
    }

    /// 設定からパイプラインを組み立てる（読み込みはまだ行わない）
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let loader = build_loader(config)?;
        let engine = InferenceEngine::with_timeouts(loader, config.timeouts());

        Ok(Self::new(
            engine,
            LabelStore::new(&config.labels.path),
            config.preprocess(),
            config.model.score_semantics,
            config.inference.top_k,
        ))
    }

    /// モデルとラベル表を読み込む
    ///
    /// 進捗はモデル読み込みで `0.7` まで、ラベル表の読み込み完了で `1.0` になります。
    /// 読み込み済みなら何もせず `1.0` を通知します。
    pub async fn load(&self, progress: Arc<dyn ProgressSink>) -> Result<()> {
        if self.is_loaded() {
            progress.report(1.0);
            return Ok(());
        }
        let progress: Arc<dyn ProgressSink> = Arc::new(Monotonic::new(progress));

        self.engine
            .load(Arc::new(Scaled::new(
                progress.clone(),
                0.0,
                MODEL_PROGRESS_END,
            )))
            .await?;

        if let Some(shape) = self.engine.input_shape() {
            if shape != self.preprocess.shape() {
                return Err(ClassifierError::ShapeMismatch {
                    expected: shape,
                    actual: self.preprocess.shape(),
                });
            }
        }

        self.labels.load().await?;
        progress.report(1.0);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded() && self.labels.get().is_some()
    }

    /// 既定の件数で分類
    pub async fn classify(&self, source: ImageSource) -> Result<ClassificationResult> {
        self.classify_top_k(source, self.default_top_k).await
    }

    /// 上位 `top_k` 件の分類結果を返す
    pub async fn classify_top_k(
        &self,
        source: ImageSource,
        top_k: usize,
    ) -> Result<ClassificationResult> {
        if top_k == 0 {
            return Err(ClassifierError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }
        let labels = self.labels.get().ok_or(ClassifierError::NotLoaded)?;
        if !self.engine.is_loaded() {
            return Err(ClassifierError::NotLoaded);
        }

        let started = Instant::now();
        let preprocess = self.preprocess;
        // ファイル読み込み・デコード・リサイズはブロッキングスレッドで行う
        let tensor = tokio::task::spawn_blocking(move || {
            let image = source.decode()?;
            normalize_with(&image, &preprocess)
        })
        .await
        .map_err(|e| ClassifierError::Decode(format!("preprocess task failed: {}", e)))??;
        let raw = self.engine.infer(tensor).await?;

        let semantics = match self.score_semantics {
            ScoreSemantics::Auto => self.engine.declared_semantics().unwrap_or(ScoreSemantics::Auto),
            explicit => explicit,
        };
        let scores = interpret_as(raw.as_slice(), semantics);
        let result = rank(&scores, &labels, top_k)?.into_result();

        debug!("[pipeline] 分類完了 ({:.2?})", started.elapsed());
        info!(
            "[pipeline] 予測: {} (class {}, {:.1}%)",
            result.display_label,
            result.class_index,
            result.confidence * 100.0
        );
        Ok(result)
    }

    pub fn preprocess(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    /// モデルを破棄（ラベル表は保持）
    pub fn unload_model(&mut self) {
        self.engine.unload();
    }
}

/// 設定に応じたモデルローダー
pub fn build_loader(config: &AppConfig) -> Result<Arc<dyn ModelLoader>> {
    match config.model.backend {
        #[cfg(feature = "onnx")]
        BackendKind::Onnx => Ok(Arc::new(crate::ml::onnx_backend::OnnxModelLoader::new(
            &config.model.model_path,
            config.preprocess().shape(),
        ))),
        #[cfg(feature = "burn")]
        BackendKind::Burn => Ok(Arc::new(crate::ml::burn_backend::BurnModelLoader::new(
            &config.model.model_path,
            config.device_type,
        ))),
        #[cfg(feature = "remote")]
        BackendKind::Remote => Ok(Arc::new(crate::ml::remote_backend::RemoteModelLoader::new(
            config.remote.endpoint.clone(),
            config.preprocess().shape(),
            config.remote.num_classes,
        ))),
        #[allow(unreachable_patterns)]
        other => Err(ClassifierError::Config(format!(
            "backend `{}` is not compiled into this build",
            other
        ))),
    }
}
