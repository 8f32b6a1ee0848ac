//! モデル推論機能
//!
//! `InferenceEngine` はロード済みモデルのハンドルだけを保持します。
//! ロードは1回だけ行われ、完了するまで推論要求は `NotLoaded` で拒否されます。

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{ClassifierError, Result};
use crate::ml::scores::ScoreSemantics;
use crate::progress::{Monotonic, ProgressSink};
use crate::types::{NormalizedTensor, RawScores, TensorShape};

/// ロード済みモデル
///
/// 複数の推論要求から共有されるため、`run` は `&self` で呼び出せる必要があります。
pub trait InferenceBackend: Send + Sync {
    /// モデルが要求する入力形状（バッチ次元を除く）
    fn input_shape(&self) -> TensorShape;

    /// 出力クラス数（モデルから判明しない場合は `None`）
    fn num_classes(&self) -> Option<usize>;

    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>>;

    /// 成果物が宣言している出力の意味（未宣言なら `None`）
    fn score_semantics(&self) -> Option<ScoreSemantics> {
        None
    }
}

/// モデル成果物の読み込み
///
/// ブロッキングスレッド上で呼ばれます。進捗は `[0, 1]` で通知してください。
pub trait ModelLoader: Send + Sync {
    /// ログ用の成果物名
    fn describe(&self) -> String;

    fn load(&self, progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>>;
}

/// load / infer の制限時間（`None` は無制限）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineTimeouts {
    pub load: Option<Duration>,
    pub infer: Option<Duration>,
}

/// 推論エンジン
pub struct InferenceEngine {
    loader: Arc<dyn ModelLoader>,
    backend: OnceCell<Arc<dyn InferenceBackend>>,
    timeouts: EngineTimeouts,
}

impl InferenceEngine {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self::with_timeouts(loader, EngineTimeouts::default())
    }

    pub fn with_timeouts(loader: Arc<dyn ModelLoader>, timeouts: EngineTimeouts) -> Self {
        Self {
            loader,
            backend: OnceCell::new(),
            timeouts,
        }
    }

    /// モデルを読み込む
    ///
    /// ロード済みなら何もせず、進捗 `1.0` だけを通知します。
    /// 同時に呼ばれた場合は最初の1回だけが読み込みを行い、他はその完了を待ちます。
    pub async fn load(&self, progress: Arc<dyn ProgressSink>) -> Result<()> {
        let progress: Arc<dyn ProgressSink> = Arc::new(Monotonic::new(progress));

        if self.backend.initialized() {
            progress.report(1.0);
            return Ok(());
        }

        self.backend
            .get_or_try_init(|| self.load_backend(progress.clone()))
            .await?;

        progress.report(1.0);
        Ok(())
    }

    async fn load_backend(
        &self,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Arc<dyn InferenceBackend>> {
        let name = self.loader.describe();
        info!("[inference] モデル読み込み開始: {}", name);
        let started = Instant::now();

        let loader = Arc::clone(&self.loader);
        let task = tokio::task::spawn_blocking(move || {
            progress.report(0.0);
            loader.load(progress.as_ref())
        });

        let joined = match self.timeouts.load {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| ClassifierError::Timeout {
                    operation: "model load",
                    after: limit,
                })?,
            None => task.await,
        };

        let backend = joined
            .map_err(|e| ClassifierError::ModelLoad(format!("load task failed: {}", e)))??;

        info!(
            "[inference] モデル読み込み完了: {} (入力 {}, クラス数 {:?}, {:.2?})",
            name,
            backend.input_shape(),
            backend.num_classes(),
            started.elapsed()
        );
        Ok(Arc::from(backend))
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.initialized()
    }

    /// ロード済みモデルの入力形状
    pub fn input_shape(&self) -> Option<TensorShape> {
        self.backend.get().map(|backend| backend.input_shape())
    }

    /// ロード済みモデルが宣言している出力の意味
    pub fn declared_semantics(&self) -> Option<ScoreSemantics> {
        self.backend.get().and_then(|backend| backend.score_semantics())
    }

    /// 推論を実行して生スコアを返す
    pub async fn infer(&self, tensor: NormalizedTensor) -> Result<RawScores> {
        let backend = self.backend.get().ok_or(ClassifierError::NotLoaded)?;

        let expected = backend.input_shape();
        if tensor.shape() != expected {
            return Err(ClassifierError::ShapeMismatch {
                expected,
                actual: tensor.shape(),
            });
        }

        let backend = Arc::clone(backend);
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            let scores = backend.run(&tensor)?;
            if let Some(num_classes) = backend.num_classes() {
                if scores.len() != num_classes {
                    return Err(ClassifierError::Inference(format!(
                        "model returned {} scores, expected {}",
                        scores.len(),
                        num_classes
                    )));
                }
            }
            if scores.is_empty() {
                return Err(ClassifierError::Inference("model returned no scores".to_string()));
            }
            if let Some(idx) = scores.iter().position(|v| !v.is_finite()) {
                return Err(ClassifierError::Inference(format!(
                    "model returned a non-finite score for class {}",
                    idx
                )));
            }
            Ok(scores)
        });

        let joined = match self.timeouts.infer {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| ClassifierError::Timeout {
                    operation: "inference",
                    after: limit,
                })?,
            None => task.await,
        };

        let scores = joined
            .map_err(|e| ClassifierError::Inference(format!("inference task failed: {}", e)))??;
        debug!("[inference] {} クラス, {:.2?}", scores.len(), started.elapsed());

        Ok(RawScores(scores))
    }

    /// ロード済みモデルを破棄（次の `load` で再読み込み）
    pub fn unload(&mut self) {
        if self.backend.take().is_some() {
            info!("[inference] モデルを破棄しました: {}", self.loader.describe());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::progress::tests::Recorder;
    use crate::progress::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex;

    /// 入力の平均値をクラス0に、残りを固定値で返すテスト用モデル
    pub(crate) struct FakeBackend {
        pub shape: TensorShape,
        pub scores: Vec<f32>,
        pub run_delay: Option<Duration>,
        pub semantics: Option<ScoreSemantics>,
    }

    impl InferenceBackend for FakeBackend {
        fn input_shape(&self) -> TensorShape {
            self.shape
        }

        fn num_classes(&self) -> Option<usize> {
            Some(self.scores.len())
        }

        fn score_semantics(&self) -> Option<ScoreSemantics> {
            self.semantics
        }

        fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>> {
            if let Some(delay) = self.run_delay {
                std::thread::sleep(delay);
            }
            let data = tensor.as_slice();
            let mean = data.iter().sum::<f32>() / data.len() as f32;
            let mut scores = self.scores.clone();
            scores[0] = mean;
            Ok(scores)
        }
    }

    /// 読み込み回数を数えるテスト用ローダー
    pub(crate) struct FakeLoader {
        pub shape: TensorShape,
        pub scores: Vec<f32>,
        pub loads: AtomicUsize,
        pub delay: Option<Duration>,
        pub run_delay: Option<Duration>,
        pub semantics: Option<ScoreSemantics>,
    }

    impl FakeLoader {
        pub fn new(shape: TensorShape, scores: Vec<f32>) -> Self {
            Self {
                shape,
                scores,
                loads: AtomicUsize::new(0),
                delay: None,
                run_delay: None,
                semantics: None,
            }
        }
    }

    impl ModelLoader for FakeLoader {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        fn load(&self, progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            progress.report(0.3);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            progress.report(0.7);
            Ok(Box::new(FakeBackend {
                shape: self.shape,
                scores: self.scores.clone(),
                run_delay: self.run_delay,
                semantics: self.semantics,
            }))
        }
    }

    /// 合図があるまで読み込みを終えないローダー
    struct GatedLoader {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ModelLoader for GatedLoader {
        fn describe(&self) -> String {
            "gated".to_string()
        }

        fn load(&self, _progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
            self.started.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(Box::new(FakeBackend {
                shape: TensorShape::square(1, 2),
                scores: vec![0.5, 0.5],
                run_delay: None,
                semantics: None,
            }))
        }
    }

    struct BrokenLoader;

    impl ModelLoader for BrokenLoader {
        fn describe(&self) -> String {
            "broken".to_string()
        }

        fn load(&self, _progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
            Err(ClassifierError::ModelLoad("corrupt artifact".to_string()))
        }
    }

    fn tensor(channels: usize, size: usize, value: f32) -> NormalizedTensor {
        let shape = TensorShape::square(channels, size);
        NormalizedTensor::new(shape, vec![value; shape.len()])
    }

    #[tokio::test]
    async fn test_infer_before_load_is_rejected() {
        let loader = Arc::new(FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]));
        let engine = InferenceEngine::new(loader);
        let err = engine.infer(tensor(1, 4, 0.5)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::NotLoaded));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let loader = Arc::new(FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]));
        let engine = InferenceEngine::new(loader.clone());

        let recorder = Arc::new(Recorder::default());
        engine.load(recorder.clone()).await.unwrap();
        assert_eq!(recorder.values(), vec![0.0, 0.3, 0.7, 1.0]);

        let second = Arc::new(Recorder::default());
        engine.load(second.clone()).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(second.values(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_initialize_once() {
        let mut fake = FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]);
        fake.delay = Some(Duration::from_millis(50));
        let loader = Arc::new(fake);
        let engine = Arc::new(InferenceEngine::new(loader.clone()));

        let a = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.load(Arc::new(NoProgress)).await })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.load(Arc::new(NoProgress)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_infer_during_load_is_rejected() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let engine = Arc::new(InferenceEngine::new(Arc::new(GatedLoader {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        })));

        let loading = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.load(Arc::new(NoProgress)).await })
        };
        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();

        let err = engine.infer(tensor(1, 2, 0.1)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::NotLoaded));

        release_tx.send(()).unwrap();
        loading.await.unwrap().unwrap();
        assert!(engine.infer(tensor(1, 2, 0.1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shape_mismatch() {
        let loader = Arc::new(FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]));
        let engine = InferenceEngine::new(loader);
        engine.load(Arc::new(NoProgress)).await.unwrap();

        let err = engine.infer(tensor(3, 4, 0.5)).await.unwrap_err();
        match err {
            ClassifierError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, TensorShape::square(1, 4));
                assert_eq!(actual, TensorShape::square(3, 4));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_infer_returns_raw_scores() {
        let loader = Arc::new(FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 3.0, -1.0]));
        let engine = InferenceEngine::new(loader);
        engine.load(Arc::new(NoProgress)).await.unwrap();

        let scores = engine.infer(tensor(1, 4, 0.25)).await.unwrap();
        assert_eq!(scores.as_slice(), &[0.25, 3.0, -1.0]);
    }

    #[tokio::test]
    async fn test_load_failure_is_not_cached() {
        let engine = InferenceEngine::new(Arc::new(BrokenLoader));
        let err = engine.load(Arc::new(NoProgress)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::ModelLoad(_)));
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let mut fake = FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]);
        fake.delay = Some(Duration::from_millis(500));
        let engine = InferenceEngine::with_timeouts(
            Arc::new(fake),
            EngineTimeouts {
                load: Some(Duration::from_millis(20)),
                infer: None,
            },
        );

        let err = engine.load(Arc::new(NoProgress)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Timeout { operation: "model load", .. }));
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_infer_timeout() {
        let mut fake = FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]);
        fake.run_delay = Some(Duration::from_millis(500));
        let engine = InferenceEngine::with_timeouts(
            Arc::new(fake),
            EngineTimeouts {
                load: None,
                infer: Some(Duration::from_millis(20)),
            },
        );
        engine.load(Arc::new(NoProgress)).await.unwrap();

        let err = engine.infer(tensor(1, 4, 0.5)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Timeout { operation: "inference", .. }));
        // タイムアウト後もモデルは使える状態のまま
        assert!(engine.is_loaded());
    }

    #[tokio::test]
    async fn test_non_finite_scores_are_rejected() {
        let loader = Arc::new(FakeLoader::new(
            TensorShape::square(1, 4),
            vec![0.0, f32::NAN, 1.0],
        ));
        let engine = InferenceEngine::new(loader);
        engine.load(Arc::new(NoProgress)).await.unwrap();

        let err = engine.infer(tensor(1, 4, 0.5)).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Inference(_)));
    }

    #[tokio::test]
    async fn test_declared_semantics_from_backend() {
        let mut fake = FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]);
        fake.semantics = Some(ScoreSemantics::Logits);
        let engine = InferenceEngine::new(Arc::new(fake));
        assert_eq!(engine.declared_semantics(), None);
        engine.load(Arc::new(NoProgress)).await.unwrap();
        assert_eq!(engine.declared_semantics(), Some(ScoreSemantics::Logits));
    }

    #[tokio::test]
    async fn test_unload_allows_reload() {
        let loader = Arc::new(FakeLoader::new(TensorShape::square(1, 4), vec![0.0, 1.0]));
        let mut engine = InferenceEngine::new(loader.clone());
        engine.load(Arc::new(NoProgress)).await.unwrap();
        engine.unload();
        assert!(!engine.is_loaded());
        assert!(matches!(
            engine.infer(tensor(1, 4, 0.0)).await.unwrap_err(),
            ClassifierError::NotLoaded
        ));

        engine.load(Arc::new(NoProgress)).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }
}
