//! Burn版の分類モデル定義
//!
//! `.tar.gz` アーカイブ（重み + メタデータ）から復元するCNNです。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use tracing::debug;

/// 入力サイズの下限（3回の畳み込みと2回のプーリング後に1px以上残る大きさ）
pub const MIN_INPUT_SIZE: usize = 14;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力チャンネル数（1: グレースケール, 3: RGB）
    #[config(default = 1)]
    pub in_channels: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 畳み込み後の特徴マップの一辺
    ///
    /// Conv(3x3, padding無し)で2減少、Pool(2x2)で半分
    pub fn feature_map_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        after_pool2.saturating_sub(2)
    }

    /// モデルを初期化
    ///
    /// `image_size` は事前に `MIN_INPUT_SIZE` 以上であることを確認しておくこと。
    pub fn init<B: Backend>(&self, device: &B::Device) -> JuktobornoClassifier<B> {
        let feature_map_size = self.feature_map_size().max(1);

        // 特徴次元 d = 128チャネル * feature_map_size^2
        let d = 128 * feature_map_size * feature_map_size;
        let d_half = d / 2;

        debug!(
            "[Model] 入力 {}x{}x{}, 特徴マップ {}x{}, FC {} -> {} -> {}",
            self.in_channels,
            self.image_size,
            self.image_size,
            feature_map_size,
            feature_map_size,
            d,
            d_half,
            self.num_classes
        );

        JuktobornoClassifier {
            conv1: Conv2dConfig::new([self.in_channels, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),
            conv3: Conv2dConfig::new([64, 128], [3, 3])
                .with_stride([1, 1])
                .init(device),
            fc1: LinearConfig::new(d, d_half).init(device),
            fc2: LinearConfig::new(d_half, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 結合文字分類用CNN
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool} x 2
/// - Conv 3x3 + ReLU
/// - FC: d -> d/2 + ReLU
/// - FC: d/2 -> num_classes（ロジットを出力、Softmaxは含まない）
#[derive(Module, Debug)]
pub struct JuktobornoClassifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv3: Conv2d<B>,

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> JuktobornoClassifier<B> {
    /// 順伝播
    ///
    /// - `images`: [batch_size, channels, size, size]
    /// - 戻り値: クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_feature_map_size() {
        let config = ModelConfig::new(10).with_image_size(48);
        // 48 -> 46 -> 23 -> 21 -> 10 -> 8
        assert_eq!(config.feature_map_size(), 8);
        let config = ModelConfig::new(10).with_image_size(MIN_INPUT_SIZE);
        assert_eq!(config.feature_map_size(), 1);
    }

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::default();
        let config = ModelConfig::new(7).with_image_size(16).with_in_channels(1);
        let model = config.init::<NdArray>(&device);

        let input = Tensor::<NdArray, 4>::zeros([2, 1, 16, 16], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 7]);
    }
}
