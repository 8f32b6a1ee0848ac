//! リモート推論（HTTP）
//!
//! 正規化済みテンソルを画像に戻し、`POST {endpoint}?top_k=N` に multipart の `file` として送ります。
//! 返ってきた上位予測（確率）をクラス数分のスコアに展開するので、
//! 呼び出し側からはローカルモデルと同じく「テンソル → 生スコア」に見えます。

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use std::io::Cursor;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{ClassifierError, Result};
use crate::ml::inference::{InferenceBackend, ModelLoader};
use crate::ml::scores::ScoreSemantics;
use crate::progress::ProgressSink;
use crate::types::{ChannelMode, NormalizedTensor, TensorShape};

/// 推論サーバーへの接続設定
#[derive(Debug, Clone)]
pub struct RemoteModelLoader {
    pub endpoint: String,
    pub input_shape: TensorShape,
    pub num_classes: usize,
}

impl RemoteModelLoader {
    pub fn new(endpoint: impl Into<String>, input_shape: TensorShape, num_classes: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            input_shape,
            num_classes,
        }
    }
}

impl ModelLoader for RemoteModelLoader {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    fn load(&self, progress: &dyn ProgressSink) -> Result<Box<dyn InferenceBackend>> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            ClassifierError::ModelLoad(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;
        if self.num_classes == 0 {
            return Err(ClassifierError::ModelLoad(
                "remote backend needs a positive class count".to_string(),
            ));
        }
        if ChannelMode::from_channels(self.input_shape.channels).is_none() {
            return Err(ClassifierError::ModelLoad(format!(
                "unsupported input channel count: {}",
                self.input_shape.channels
            )));
        }
        // run() はブロッキングスレッドから呼ばれるので、ランタイムのハンドルで要求を待つ
        let handle = Handle::try_current()
            .map_err(|e| ClassifierError::ModelLoad(format!("no async runtime: {}", e)))?;
        progress.report(0.5);

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ClassifierError::ModelLoad(format!("http client: {}", e)))?;

        Ok(Box::new(RemoteBackend {
            client,
            url,
            handle,
            input_shape: self.input_shape,
            num_classes: self.num_classes,
        }))
    }
}

/// `/predict` のレスポンス（使うのは上位予測だけ）
#[derive(Debug, Deserialize)]
struct PredictResponse {
    top_predictions: Vec<RemotePrediction>,
}

#[derive(Debug, Deserialize)]
struct RemotePrediction {
    class_id: usize,
    confidence: f32,
}

pub struct RemoteBackend {
    client: reqwest::Client,
    url: Url,
    handle: Handle,
    input_shape: TensorShape,
    num_classes: usize,
}

impl RemoteBackend {
    async fn request(&self, png: Vec<u8>) -> Result<PredictResponse> {
        let part = Part::bytes(png)
            .file_name("input.png")
            .mime_str("image/png")
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url.clone())
            .query(&[("top_k", self.num_classes)])
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClassifierError::Inference(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Inference(format!(
                "remote inference returned {}",
                status
            )));
        }

        response
            .json::<PredictResponse>()
            .await
            .map_err(|e| ClassifierError::Inference(format!("invalid response body: {}", e)))
    }
}

impl InferenceBackend for RemoteBackend {
    fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    /// サーバーは確率を返す
    fn score_semantics(&self) -> Option<ScoreSemantics> {
        Some(ScoreSemantics::Probabilities)
    }

    fn run(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>> {
        let png = encode_png(tensor)?;
        debug!("[remote] {} bytes -> {}", png.len(), self.url);
        let response = self.handle.block_on(self.request(png))?;
        expand_scores(&response.top_predictions, self.num_classes)
    }
}

/// テンソルを8bit PNGに戻す（RGBはプレーン形式から並べ直す）
fn encode_png(tensor: &NormalizedTensor) -> Result<Vec<u8>> {
    let shape = tensor.shape();
    let data = tensor.as_slice();
    let plane = shape.height * shape.width;
    let (width, height) = (shape.width as u32, shape.height as u32);
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;

    let image = match ChannelMode::from_channels(shape.channels) {
        Some(ChannelMode::Grayscale) => {
            GrayImage::from_raw(width, height, data.iter().map(|&v| to_u8(v)).collect())
                .map(DynamicImage::ImageLuma8)
        }
        Some(ChannelMode::Rgb) => {
            let mut pixels = Vec::with_capacity(plane * 3);
            for i in 0..plane {
                for c in 0..3 {
                    pixels.push(to_u8(data[c * plane + i]));
                }
            }
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        None => None,
    }
    .ok_or_else(|| {
        ClassifierError::Inference(format!("cannot encode tensor {} as an image", shape))
    })?;

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ClassifierError::Inference(format!("png encode: {}", e)))?;
    Ok(bytes)
}

/// 上位予測をクラス数分のスコアに展開（返ってこなかったクラスは0）
fn expand_scores(predictions: &[RemotePrediction], num_classes: usize) -> Result<Vec<f32>> {
    if predictions.is_empty() {
        return Err(ClassifierError::Inference(
            "remote inference returned no predictions".to_string(),
        ));
    }
    let mut scores = vec![0.0; num_classes];
    for prediction in predictions {
        let slot = scores.get_mut(prediction.class_id).ok_or_else(|| {
            ClassifierError::Inference(format!(
                "remote class id {} is outside 0..{}",
                prediction.class_id, num_classes
            ))
        })?;
        *slot = prediction.confidence;
    }
    Ok(scores)
}
