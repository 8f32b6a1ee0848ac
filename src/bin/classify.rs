//! 画像を分類して結果をJSONで出力するコマンド
//!
//! ```text
//! classify --config config.json --top-k 3 sample.png data:image/png;base64,...
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use juktoborno_lib::model::config::{AppConfig, BackendKind, DeviceType};
use juktoborno_lib::{ChannelMode, Classifier, ImageSource, LogProgress};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "classify", about = "結合文字画像の分類")]
struct Args {
    /// 設定ファイル（JSON）
    #[arg(long)]
    config: Option<PathBuf>,

    /// モデル成果物のパス
    #[arg(long)]
    model: Option<String>,

    /// ラベル表（CSV）のパス
    #[arg(long)]
    labels: Option<String>,

    /// 入力画像サイズ（正方形）
    #[arg(long)]
    input_size: Option<u32>,

    /// 入力チャンネル数（1 または 3）
    #[arg(long)]
    channels: Option<usize>,

    /// 返す予測の件数
    #[arg(long)]
    top_k: Option<usize>,

    /// 推論バックエンド（onnx / burn / remote）
    #[arg(long)]
    backend: Option<String>,

    /// 推論サーバーのURL（remoteのみ）
    #[arg(long)]
    endpoint: Option<String>,

    /// サーバー側モデルのクラス数（remoteのみ）
    #[arg(long)]
    num_classes: Option<usize>,

    /// 計算デバイス（cpu / wgpu、burnのみ）
    #[arg(long)]
    device: Option<String>,

    /// デフォルト設定を書き出して終了
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,

    /// 画像ファイルまたは data URL
    images: Vec<String>,
}

impl Args {
    fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(model) = &self.model {
            config.set_model_path(model.clone());
        }
        if let Some(labels) = &self.labels {
            config.labels.path = labels.clone();
        }
        if let Some(size) = self.input_size {
            config.model.input_size = size;
        }
        if let Some(channels) = self.channels {
            config.model.channel_mode = ChannelMode::from_channels(channels)
                .with_context(|| format!("unsupported channel count: {}", channels))?;
        }
        if let Some(top_k) = self.top_k {
            config.inference.top_k = top_k;
        }
        if let Some(backend) = &self.backend {
            config.model.backend = match backend.as_str() {
                "onnx" => BackendKind::Onnx,
                "burn" => BackendKind::Burn,
                "remote" => BackendKind::Remote,
                other => bail!("unknown backend: {}", other),
            };
        }
        if let Some(endpoint) = &self.endpoint {
            config.remote.endpoint = endpoint.clone();
        }
        if let Some(num_classes) = self.num_classes {
            config.remote.num_classes = num_classes;
        }
        if let Some(device) = &self.device {
            config.set_device_type(match device.as_str() {
                "cpu" => DeviceType::Cpu,
                "wgpu" => DeviceType::Wgpu,
                other => bail!("unknown device: {}", other),
            });
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        AppConfig::default()
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("デフォルト設定を書き出しました: {}", path.display());
        return Ok(());
    }

    if args.images.is_empty() {
        bail!("no input images given");
    }

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path);
    args.apply_overrides(&mut config)?;
    config.display();

    let classifier = Classifier::from_config(&config)?;
    classifier
        .load(Arc::new(LogProgress::new("モデル読み込み")))
        .await
        .context("failed to load the classifier")?;

    let mut failures = 0usize;
    for input in &args.images {
        let source = ImageSource::parse(input);
        let name = if input.starts_with("data:") {
            "<data url>".to_string()
        } else {
            input.clone()
        };

        match classifier.classify(source).await {
            Ok(result) => {
                let line = serde_json::json!({ "input": name, "result": result });
                println!("{}", serde_json::to_string(&line)?);
            }
            Err(e) => {
                error!("{}: {}", name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} images failed", failures, args.images.len());
    }
    Ok(())
}
