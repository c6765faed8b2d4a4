//! CNN Model Architecture for Tissue Patch Classification
//!
//! Both variants are assembled from Burn's stock layers. The network emits
//! two logits (benign, malignant); the malignant probability is the second
//! softmax column.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::config::{CnnVariant, HyperParams};

/// Configuration for the PatchClassifier
#[derive(Config, Debug)]
pub struct PatchClassifierConfig {
    pub variant: CnnVariant,
    pub hyperparams: HyperParams,

    /// Input patch size (square)
    #[config(default = "96")]
    pub image_size: usize,

    /// Benign and malignant
    #[config(default = "2")]
    pub num_classes: usize,

    #[config(default = "3")]
    pub in_channels: usize,
}

impl PatchClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchClassifier<B> {
        PatchClassifier::new(self, device)
    }
}

/// One downsampling stage.
///
/// Baseline: Conv -> ReLU -> MaxPool.
/// Deep: Conv -> BN -> ReLU -> Conv -> BN -> ReLU -> MaxPool -> Dropout.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: Option<BatchNorm<B>>,
    pub conv2: Option<Conv2d<B>>,
    pub bn2: Option<BatchNorm<B>>,
    pub relu: Relu,
    pub pool: MaxPool2d,
    pub dropout: Option<Dropout>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn baseline(in_channels: usize, out_channels: usize, kernel_size: usize, device: &B::Device) -> Self {
        Self {
            conv1: same_conv(in_channels, out_channels, kernel_size, device),
            bn1: None,
            conv2: None,
            bn2: None,
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: None,
        }
    }

    pub fn deep(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            conv1: same_conv(in_channels, out_channels, kernel_size, device),
            bn1: Some(BatchNormConfig::new(out_channels).init(device)),
            conv2: Some(same_conv(out_channels, out_channels, kernel_size, device)),
            bn2: Some(BatchNormConfig::new(out_channels).init(device)),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: Some(DropoutConfig::new(dropout).init()),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv1.forward(x);
        if let Some(bn) = &self.bn1 {
            x = bn.forward(x);
        }
        x = self.relu.forward(x);

        if let Some(conv) = &self.conv2 {
            x = conv.forward(x);
            if let Some(bn) = &self.bn2 {
                x = bn.forward(x);
            }
            x = self.relu.forward(x);
        }

        let x = self.pool.forward(x);
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

fn same_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

/// Binary patch classifier
///
/// The feature extractor is a stack of `ConvBlock`s with doubling filter
/// counts. Baseline flattens the last feature map; Deep global-average-pools
/// it first, so its head size does not depend on the input resolution.
#[derive(Module, Debug)]
pub struct PatchClassifier<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: Option<AdaptiveAvgPool2d>,
    pub fc1: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> PatchClassifier<B> {
    pub fn new(config: &PatchClassifierConfig, device: &B::Device) -> Self {
        let hp = &config.hyperparams;

        let mut blocks = Vec::with_capacity(hp.conv_blocks);
        let mut in_channels = config.in_channels;
        for index in 0..hp.conv_blocks {
            let out_channels = hp.filters_at(index);
            let block = match config.variant {
                CnnVariant::Baseline => {
                    ConvBlock::baseline(in_channels, out_channels, hp.kernel_size, device)
                }
                CnnVariant::Deep => {
                    ConvBlock::deep(in_channels, out_channels, hp.kernel_size, hp.dropout, device)
                }
            };
            blocks.push(block);
            in_channels = out_channels;
        }

        let (global_pool, features) = match config.variant {
            CnnVariant::Baseline => {
                let side = hp.feature_map_size(config.image_size);
                (None, hp.final_filters() * side * side)
            }
            CnnVariant::Deep => (
                Some(AdaptiveAvgPool2dConfig::new([1, 1]).init()),
                hp.final_filters(),
            ),
        };

        Self {
            blocks,
            global_pool,
            fc1: LinearConfig::new(features, hp.dense_units).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(hp.dropout).init(),
            fc2: LinearConfig::new(hp.dense_units, config.num_classes).init(device),
        }
    }

    /// Logits of shape [batch_size, num_classes] for input [batch_size, 3, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        if let Some(pool) = &self.global_pool {
            x = pool.forward(x);
        }

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Malignant probability per patch, shape [batch_size]
    pub fn forward_probabilities(&self, x: Tensor<B, 4>) -> Tensor<B, 1> {
        let probs = self.forward_softmax(x);
        let [batch_size, _] = probs.dims();
        probs.narrow(1, 1, 1).reshape([batch_size])
    }
}

/// Build a classifier for `variant` from a hyperparameter object
pub fn build_model<B: Backend>(
    variant: CnnVariant,
    hyperparams: &HyperParams,
    image_size: usize,
    device: &B::Device,
) -> crate::Result<(PatchClassifier<B>, PatchClassifierConfig)> {
    hyperparams.validate(image_size)?;

    let config = PatchClassifierConfig::new(variant, hyperparams.clone()).with_image_size(image_size);
    let model = config.init(device);
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny_hyperparams() -> HyperParams {
        HyperParams {
            base_filters: 4,
            kernel_size: 3,
            conv_blocks: 2,
            dense_units: 8,
            dropout: 0.2,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_baseline_output_shape() {
        let device = Default::default();
        let (model, _) =
            build_model::<TestBackend>(CnnVariant::Baseline, &tiny_hyperparams(), 16, &device)
                .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([3, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [3, 2]);
        assert!(model.global_pool.is_none());
    }

    #[test]
    fn test_deep_output_shape() {
        let device = Default::default();
        let (model, config) =
            build_model::<TestBackend>(CnnVariant::Deep, &tiny_hyperparams(), 16, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [2, 2]);
        assert_eq!(model.blocks.len(), 2);
        assert!(model.blocks[0].conv2.is_some());
        assert_eq!(config.num_classes, crate::dataset::NUM_CLASSES);
    }

    #[test]
    fn test_deep_head_is_resolution_independent() {
        let device = Default::default();
        let (model, _) =
            build_model::<TestBackend>(CnnVariant::Deep, &tiny_hyperparams(), 16, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [1, 2]);
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let device = Default::default();
        let (model, _) =
            build_model::<TestBackend>(CnnVariant::Baseline, &tiny_hyperparams(), 16, &device)
                .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([4, 3, 16, 16], &device);
        let probs: Vec<f32> = model
            .forward_probabilities(input)
            .into_data()
            .to_vec()
            .unwrap();

        assert_eq!(probs.len(), 4);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_build_rejects_invalid_hyperparams() {
        let device = Default::default();
        let hp = HyperParams {
            conv_blocks: 6,
            ..tiny_hyperparams()
        };
        assert!(build_model::<TestBackend>(CnnVariant::Baseline, &hp, 16, &device).is_err());
    }

    #[test]
    fn test_variants_differ_in_param_count() {
        let device = Default::default();
        let hp = tiny_hyperparams();
        let (baseline, _) =
            build_model::<TestBackend>(CnnVariant::Baseline, &hp, 16, &device).unwrap();
        let (deep, _) = build_model::<TestBackend>(CnnVariant::Deep, &hp, 16, &device).unwrap();

        assert!(baseline.num_params() > 0);
        assert!(deep.num_params() > 0);
        assert_ne!(baseline.num_params(), deep.num_params());
    }
}
