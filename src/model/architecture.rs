use crate::error::{Error, Result};
use crate::model::missing_value_layer::{MissingValueLayer, MissingValueLayerConfig};
use crate::model::{FusionModelConfig, ModelInput, TabularInput};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Convolutional branch over `[batch, 3, H, W]` images
#[derive(Module, Debug)]
pub struct ImageEncoder<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    proj: Linear<B>,
}

impl<B: Backend> ImageEncoder<B> {
    fn new(config: &FusionModelConfig, device: &B::Device) -> Self {
        let channels = config.conv_channels;
        let strided = |input: usize, output: usize| {
            Conv2dConfig::new([input, output], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        Self {
            conv1: strided(3, channels),
            conv2: strided(channels, channels * 2),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            proj: LinearConfig::new(channels * 2, config.hidden_size).init(device),
        }
    }

    /// `[batch, hidden_size]` image features
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        relu(self.proj.forward(x))
    }
}

/// Embedding + imputation branch over categorical and continuous columns
#[derive(Module, Debug)]
pub struct TabularEncoder<B: Backend> {
    embeddings: Vec<Embedding<B>>,
    missing: Option<MissingValueLayer<B>>,
    proj: Linear<B>,
}

impl<B: Backend> TabularEncoder<B> {
    fn new(config: &FusionModelConfig, device: &B::Device) -> Self {
        let embeddings = config.category_dims.iter()
            .map(|&dim| EmbeddingConfig::new(dim, config.embedding_dim).init(device))
            .collect();
        let missing = (config.num_continuous > 0).then(|| {
            MissingValueLayerConfig::new(config.num_continuous, config.missing_value_hidden_size)
                .init(device)
        });
        let input_size = config.category_dims.len() * config.embedding_dim + config.num_continuous;

        Self {
            embeddings,
            missing,
            proj: LinearConfig::new(input_size, config.hidden_size).init(device),
        }
    }

    /// `[batch, hidden_size]` tabular features
    pub fn forward(&self, input: TabularInput<B>) -> Tensor<B, 2> {
        let [batch_size, _] = input.categorical.dims();
        let mut features = Vec::with_capacity(self.embeddings.len() + 1);

        for (i, embedding) in self.embeddings.iter().enumerate() {
            let column = input.categorical.clone().slice([0..batch_size, i..i + 1]);
            let embedded = embedding.forward(column);
            let [_, _, dim] = embedded.dims();
            features.push(embedded.reshape([batch_size, dim]));
        }

        if let Some(missing) = &self.missing {
            features.push(missing.forward(input.continuous, input.continuous_mask));
        }

        relu(self.proj.forward(Tensor::cat(features, 1)))
    }
}

/// Reference classifier over image and tabular inputs
#[derive(Module, Debug)]
pub struct FusionModel<B: Backend> {
    image: Option<ImageEncoder<B>>,
    tabular: Option<TabularEncoder<B>>,
    dropout: Dropout,
    head: Linear<B>,
}

/// Loss and logits of a labelled batch
#[derive(Debug)]
pub struct FusionOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub logits: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

impl FusionModelConfig {
    /// Initialize the branches the modality needs and the head
    pub fn init<B: Backend>(&self, device: &B::Device) -> FusionModel<B> {
        let image = self.modality.requires_image().then(|| ImageEncoder::new(self, device));
        let tabular = self.modality.requires_tabular().then(|| TabularEncoder::new(self, device));
        let branches = usize::from(image.is_some()) + usize::from(tabular.is_some());

        FusionModel {
            image,
            tabular,
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(branches * self.hidden_size, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> FusionModel<B> {
    /// Per-class scores `[batch, num_classes]`
    pub fn forward(&self, input: ModelInput<B>) -> Result<Tensor<B, 2>> {
        let features = match input {
            ModelInput::Multimodal { images, tabular } => {
                let image = self.image_branch()?.forward(images);
                let tabular = self.tabular_branch()?.forward(tabular);
                Tensor::cat(vec![image, tabular], 1)
            }
            ModelInput::Image { images } => self.image_branch()?.forward(images),
            ModelInput::Tabular { tabular } => self.tabular_branch()?.forward(tabular),
        };

        Ok(self.head.forward(self.dropout.forward(features)))
    }

    /// Forward pass with cross-entropy loss against class ids
    pub fn forward_classification(
        &self,
        input: ModelInput<B>,
        targets: Tensor<B, 1, Int>,
    ) -> Result<FusionOutput<B>> {
        let logits = self.forward(input)?;
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());

        Ok(FusionOutput { loss, logits, targets })
    }

    fn image_branch(&self) -> Result<&ImageEncoder<B>> {
        self.image.as_ref()
            .ok_or_else(|| Error::InvalidConfig("model was built without an image branch".to_string()))
    }

    fn tabular_branch(&self) -> Result<&TabularEncoder<B>> {
        self.tabular.as_ref()
            .ok_or_else(|| Error::InvalidConfig("model was built without a tabular branch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Modality;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn tabular(device: &<TestBackend as Backend>::Device) -> TabularInput<TestBackend> {
        TabularInput {
            categorical: Tensor::from_data(TensorData::new(vec![0i64, 2, 1, 0], [2, 2]), device),
            continuous: Tensor::from_floats([[0.5, 0.0, 1.0], [0.0, 2.0, 3.0]], device),
            continuous_mask: Tensor::from_floats([[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]], device),
        }
    }

    fn config(modality: Modality) -> FusionModelConfig {
        FusionModelConfig::new(modality, 3, vec![2, 3], 3)
            .with_hidden_size(8)
            .with_conv_channels(4)
    }

    #[test]
    fn test_multimodal_forward() {
        let device = Default::default();
        let model = config(Modality::Multimodal).init::<TestBackend>(&device);

        let input = ModelInput::Multimodal {
            images: Tensor::zeros([2, 3, 16, 16], &device),
            tabular: tabular(&device),
        };
        assert_eq!(model.forward(input).unwrap().dims(), [2, 3]);
    }

    #[test]
    fn test_single_branch_forward() {
        let device = Default::default();

        let image_model = config(Modality::ImageOnly).init::<TestBackend>(&device);
        let logits = image_model
            .forward(ModelInput::Image { images: Tensor::zeros([4, 3, 16, 16], &device) })
            .unwrap();
        assert_eq!(logits.dims(), [4, 3]);

        let tabular_model = config(Modality::TabularOnly).init::<TestBackend>(&device);
        let logits = tabular_model
            .forward(ModelInput::Tabular { tabular: tabular(&device) })
            .unwrap();
        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn test_missing_branch_is_error() {
        let device = Default::default();
        let model = config(Modality::TabularOnly).init::<TestBackend>(&device);
        let input = ModelInput::Image { images: Tensor::zeros([1, 3, 8, 8], &device) };
        assert!(matches!(model.forward(input), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_classification_loss_is_finite() {
        let device = Default::default();
        let model = config(Modality::TabularOnly).init::<TestBackend>(&device);
        let targets = Tensor::from_data(TensorData::new(vec![0i64, 2], [2]), &device);

        let output = model
            .forward_classification(ModelInput::Tabular { tabular: tabular(&device) }, targets)
            .unwrap();
        assert_eq!(output.loss.dims(), [1]);
        assert!(output.loss.into_scalar().is_finite());
    }
}
