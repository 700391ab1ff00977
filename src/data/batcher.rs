use crate::data::dataset::{MultimodalDataset, Partition, Sample};
use crate::data::imaging::ImageTransform;
use crate::error::Result;
use burn::prelude::*;
use burn::tensor::TensorData;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// A collated batch of samples
#[derive(Debug, Clone)]
pub struct MultimodalBatch<B: Backend> {
    /// `[batch, categorical_columns]`
    pub categorical: Tensor<B, 2, Int>,
    /// `[batch, continuous_columns]`, missing values zero-filled
    pub continuous: Tensor<B, 2>,
    /// `[batch, continuous_columns]`, 1.0 where observed
    pub continuous_mask: Tensor<B, 2>,
    /// `[batch, 3, height, width]`, absent when images are not collated
    pub images: Option<Tensor<B, 4>>,
    /// `[batch]` class ids
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> MultimodalBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collates samples into tensors on one device
#[derive(Debug, Clone)]
pub struct MultimodalBatcher<B: Backend> {
    device: B::Device,
    num_categorical: usize,
    num_continuous: usize,
    /// Set when images are collated; absent slices become zero images
    transform: Option<ImageTransform>,
}

impl<B: Backend> MultimodalBatcher<B> {
    /// Batcher for `dataset`; images are collated only when `include_images` is set
    /// and the dataset has images
    pub fn new(dataset: &MultimodalDataset, include_images: bool, device: B::Device) -> Self {
        let transform = (include_images && dataset.has_images()).then(|| *dataset.transform());
        Self {
            device,
            num_categorical: dataset.category_dims().len(),
            num_continuous: dataset.num_continuous(),
            transform,
        }
    }

    /// Whether batches carry an image tensor
    pub fn collates_images(&self) -> bool {
        self.transform.is_some()
    }

    /// Load and collate the samples at `positions` of a partition
    pub fn load(&self, partition: &Partition<'_>, positions: &[usize]) -> Result<MultimodalBatch<B>> {
        let samples = positions.iter()
            .map(|&p| partition.get(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.batch(&samples))
    }

    /// Collate already materialized samples
    pub fn batch(&self, samples: &[Sample]) -> MultimodalBatch<B> {
        let n = samples.len();

        let categorical: Vec<i64> = samples.iter()
            .flat_map(|s| s.categorical.iter().map(|&c| c as i64))
            .collect();
        let continuous: Vec<f32> = samples.iter()
            .flat_map(|s| s.continuous.iter().copied())
            .collect();
        let mask: Vec<f32> = samples.iter()
            .flat_map(|s| s.continuous_mask.iter().map(|&m| if m { 1.0 } else { 0.0 }))
            .collect();
        let labels: Vec<i64> = samples.iter().map(|s| s.label as i64).collect();

        let images = self.transform.map(|transform| {
            let [c, h, w] = transform.shape();
            let placeholder = transform.placeholder();
            let mut pixels = Vec::with_capacity(n * transform.num_values());
            for sample in samples {
                let image = sample.image.as_ref().unwrap_or(&placeholder);
                pixels.extend_from_slice(&image.data);
            }
            Tensor::<B, 4>::from_data(TensorData::new(pixels, [n, c, h, w]), &self.device)
        });

        MultimodalBatch {
            categorical: Tensor::from_data(
                TensorData::new(categorical, [n, self.num_categorical]),
                &self.device,
            ),
            continuous: Tensor::from_data(
                TensorData::new(continuous, [n, self.num_continuous]),
                &self.device,
            ),
            continuous_mask: Tensor::from_data(
                TensorData::new(mask, [n, self.num_continuous]),
                &self.device,
            ),
            images,
            labels: Tensor::from_data(TensorData::new(labels, [n]), &self.device),
        }
    }
}

/// Positions `0..len` grouped into batches, shuffled when an RNG is given
///
/// The last batch may be shorter than `batch_size`.
pub fn batch_positions(len: usize, batch_size: usize, rng: Option<&mut ChaCha8Rng>) -> Vec<Vec<usize>> {
    let mut positions: Vec<usize> = (0..len).collect();
    if let Some(rng) = rng {
        positions.shuffle(rng);
    }
    positions.chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::imaging::ImagePixels;
    use burn::backend::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn batcher(transform: Option<ImageTransform>) -> MultimodalBatcher<TestBackend> {
        MultimodalBatcher {
            device: Default::default(),
            num_categorical: 2,
            num_continuous: 2,
            transform,
        }
    }

    fn sample(label: usize, image: Option<ImagePixels>) -> Sample {
        Sample {
            categorical: vec![label, 1],
            continuous: vec![0.5, 0.0],
            continuous_mask: vec![true, false],
            label,
            image,
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batch = batcher(None).batch(&[sample(0, None), sample(1, None), sample(1, None)]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.categorical.dims(), [3, 2]);
        assert_eq!(batch.continuous.dims(), [3, 2]);
        assert!(batch.images.is_none());

        let mask = batch.continuous_mask.into_data().to_vec::<f32>().unwrap();
        assert_eq!(mask, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let labels = batch.labels.into_data().to_vec::<i64>().unwrap();
        assert_eq!(labels, vec![0, 1, 1]);
    }

    #[test]
    fn test_absent_image_becomes_placeholder() {
        let transform = ImageTransform::new(4);
        let image = ImagePixels {
            data: vec![1.0; transform.num_values()],
            shape: transform.shape(),
        };
        let batch = batcher(Some(transform)).batch(&[sample(0, Some(image)), sample(1, None)]);

        let images = batch.images.unwrap();
        assert_eq!(images.dims(), [2, 3, 4, 4]);
        let values = images.into_data().to_vec::<f32>().unwrap();
        let per_image = transform.num_values();
        assert!(values[..per_image].iter().all(|&v| v == 1.0));
        assert!(values[per_image..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_batch_positions() {
        let batches = batch_positions(7, 3, None);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);

        let mut rng = ChaCha8Rng::seed_from_u64(2026);
        let mut shuffled: Vec<usize> = batch_positions(7, 3, Some(&mut rng)).concat();
        shuffled.sort_unstable();
        assert_eq!(shuffled, (0..7).collect::<Vec<_>>());
    }
}
