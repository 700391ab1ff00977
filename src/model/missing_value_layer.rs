use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};

/// Missing value handling layer
///
/// Learns to impute missing continuous values from the observed ones. Observed
/// positions pass through unchanged; missing positions receive a gated
/// estimate computed from the masked input and the mask itself.
#[derive(Module, Debug)]
pub struct MissingValueLayer<B: Backend> {
    /// Transformation network for imputation
    imputation_net: Linear<B>,
    /// Gate network to control imputation strength
    gate_net: Linear<B>,
    /// Output projection
    output_proj: Linear<B>,
}

/// Missing value layer configuration
#[derive(Config, Debug)]
pub struct MissingValueLayerConfig {
    /// Number of continuous features
    pub input_size: usize,
    /// Hidden dimension for imputation network
    pub hidden_size: usize,
}

impl MissingValueLayerConfig {
    /// Initialize missing value layer
    pub fn init<B: Backend>(&self, device: &B::Device) -> MissingValueLayer<B> {
        // Values and mask are both fed to the networks
        let joint_size = self.input_size * 2;

        MissingValueLayer {
            imputation_net: LinearConfig::new(joint_size, self.hidden_size).init(device),
            gate_net: LinearConfig::new(joint_size, self.input_size).init(device),
            output_proj: LinearConfig::new(self.hidden_size, self.input_size).init(device),
        }
    }
}

impl<B: Backend> MissingValueLayer<B> {
    /// Forward pass with missing value handling
    ///
    /// # Arguments
    /// * `x` - Values of shape `[batch_size, input_size]`, missing entries zero-filled
    /// * `mask` - Same shape, 1 where the value was observed and 0 where missing
    pub fn forward(&self, x: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let observed = x.mul(mask.clone());
        let joint = Tensor::cat(vec![observed.clone(), mask.clone()], 1);

        let hidden = relu(self.imputation_net.forward(joint.clone()));
        let imputed = self.output_proj.forward(hidden);
        let gates = sigmoid(self.gate_net.forward(joint));

        let missing = mask.neg().add_scalar(1.0);
        observed.add(imputed.mul(gates).mul(missing))
    }
}
