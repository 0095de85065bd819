use super::preprocess::Tensor;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model error: {0}")]
    Model(String),
    #[error("Unexpected model output shape: expected a single value, got {0} values")]
    UnexpectedShape(usize),
    #[error("Model output {0} is not a probability")]
    InvalidOutput(f32),
    #[error("Failed to load model: {0}")]
    Load(String),
}

/// A binary classifier returning the probability of the positive
/// (`Uninfected`) class for one normalized image.
///
/// Implementations are loaded once and shared read-only; if the underlying
/// runtime is not re-entrant they must serialize calls themselves.
pub trait Classifier: Send + Sync {
    fn predict(&self, tensor: &Tensor) -> Result<f32, InferenceError>;

    fn name(&self) -> &str;
}

/// Turns raw model output into a single probability, rejecting anything
/// that is not exactly one finite value in `[0, 1]`.
pub fn single_probability(output: &[f32]) -> Result<f32, InferenceError> {
    let [probability] = output else {
        return Err(InferenceError::UnexpectedShape(output.len()));
    };
    if !probability.is_finite() || !(0.0..=1.0).contains(probability) {
        return Err(InferenceError::InvalidOutput(*probability));
    }
    Ok(*probability)
}

#[cfg(feature = "torch")]
pub use torch::TorchClassifier;

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tch::{CModule, Device, Kind, nn::ModuleT};

    use super::{Classifier, InferenceError, Tensor, single_probability};

    /// TorchScript export of the malaria classifier.
    #[derive(Clone)]
    pub struct TorchClassifier {
        model: Arc<Mutex<CModule>>,
        device: Device,
    }

    impl TorchClassifier {
        pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
            let device = Device::cuda_if_available();
            let model = CModule::load_on_device(model_path, device)
                .map_err(|e| InferenceError::Load(format!("{}: {}", model_path.display(), e)))?;
            log::info!("Loaded model {} on {:?}", model_path.display(), device);
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                device,
            })
        }
    }

    impl Classifier for TorchClassifier {
        fn predict(&self, tensor: &Tensor) -> Result<f32, InferenceError> {
            let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
            let values: Vec<f32> = tensor.iter().copied().collect();
            let input = tch::Tensor::from_slice(&values)
                .view(shape.as_slice())
                .to_device(self.device);

            let output = {
                let model = self
                    .model
                    .lock()
                    .map_err(|_| InferenceError::Model("model lock poisoned".to_string()))?;
                model.forward_t(&input, false)
            };

            let output_vec: Vec<f32> = output
                .to_kind(Kind::Float)
                .to_device(Device::Cpu)
                .view([-1])
                .try_into()
                .map_err(|e: tch::TchError| InferenceError::Model(e.to_string()))?;
            single_probability(&output_vec)
        }

        fn name(&self) -> &str {
            "torchscript"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_single_probability() {
        assert_eq!(single_probability(&[0.25]).unwrap(), 0.25);
        assert_eq!(single_probability(&[0.0]).unwrap(), 0.0);
        assert_eq!(single_probability(&[1.0]).unwrap(), 1.0);
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(matches!(
            single_probability(&[]),
            Err(InferenceError::UnexpectedShape(0))
        ));
        assert!(matches!(
            single_probability(&[0.3, 0.7]),
            Err(InferenceError::UnexpectedShape(2))
        ));
    }

    #[test]
    fn rejects_values_outside_unit_interval() {
        assert!(matches!(
            single_probability(&[f32::NAN]),
            Err(InferenceError::InvalidOutput(_))
        ));
        assert!(matches!(
            single_probability(&[1.5]),
            Err(InferenceError::InvalidOutput(_))
        ));
        assert!(matches!(
            single_probability(&[-0.01]),
            Err(InferenceError::InvalidOutput(_))
        ));
    }
}
