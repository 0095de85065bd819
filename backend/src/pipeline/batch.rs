use shared::{ClassificationResult, FailedPrediction, PredictionOutcome};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::inference::decision::decide;
use crate::inference::model::{Classifier, InferenceError};
use crate::inference::preprocess::{DecodeError, ImageNormalizer};
use crate::storage::upload_store::{StorageError, UploadStore};

/// One uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedInput {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedInput {
    pub fn new(original_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            bytes,
        }
    }
}

/// What to do when a single image cannot be decoded or classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the whole batch on the first failing image.
    FailFast,
    /// Record the failure in place and keep going.
    Isolate,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Ok(FailurePolicy::FailFast),
            "isolate" => Ok(FailurePolicy::Isolate),
            other => Err(format!("unknown batch policy '{}'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Failed to store image #{index} ({name}): {source}")]
    Storage {
        index: usize,
        name: String,
        source: StorageError,
    },
    #[error("Failed to decode image #{index} ({name}): {source}")]
    Decode {
        index: usize,
        name: String,
        source: DecodeError,
    },
    #[error("Inference failed for image #{index} ({name}): {source}")]
    Inference {
        index: usize,
        name: String,
        source: InferenceError,
    },
}

/// Results of one request, in upload order.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    pub id: Uuid,
    pub outcomes: Vec<PredictionOutcome>,
}

impl ResultBatch {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn classified(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            PredictionOutcome::Classified(result) => Some(result),
            PredictionOutcome::Failed(_) => None,
        })
    }
}

enum ItemError {
    Decode(DecodeError),
    Inference(InferenceError),
}

impl ItemError {
    fn message(&self) -> String {
        match self {
            ItemError::Decode(source) => source.to_string(),
            ItemError::Inference(source) => source.to_string(),
        }
    }

    fn into_batch_error(self, index: usize, name: String) -> BatchError {
        match self {
            ItemError::Decode(source) => BatchError::Decode { index, name, source },
            ItemError::Inference(source) => BatchError::Inference { index, name, source },
        }
    }
}

pub struct BatchProcessor {
    store: UploadStore,
    normalizer: ImageNormalizer,
    classifier: Arc<dyn Classifier>,
    policy: FailurePolicy,
}

impl BatchProcessor {
    pub fn new(
        store: UploadStore,
        normalizer: ImageNormalizer,
        classifier: Arc<dyn Classifier>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            normalizer,
            classifier,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.store.max_file_size()
    }

    /// Stores, normalizes and classifies every input strictly in order.
    ///
    /// Inputs with an empty payload are skipped, but error indices still
    /// refer to positions in `inputs`. Storage failures always abort the
    /// batch; decode and inference failures abort it only under
    /// [`FailurePolicy::FailFast`].
    pub fn run(&self, inputs: Vec<UploadedInput>) -> Result<ResultBatch, BatchError> {
        let id = Uuid::new_v4();
        let started = Instant::now();
        let inputs: Vec<(usize, UploadedInput)> = inputs
            .into_iter()
            .enumerate()
            .filter(|(_, input)| !input.bytes.is_empty())
            .collect();

        log::info!(
            "Batch {}: classifying {} image(s) with {} classifier",
            id,
            inputs.len(),
            self.classifier.name()
        );

        let mut outcomes = Vec::with_capacity(inputs.len());
        for (index, input) in &inputs {
            let index = *index;
            let stored = self
                .store
                .store(&input.original_name, &input.bytes)
                .map_err(|source| BatchError::Storage {
                    index,
                    name: input.original_name.clone(),
                    source,
                })?;

            match self.classify(&stored.path) {
                Ok(result) => {
                    let decision = decide(result);
                    let result = ClassificationResult {
                        filename: stored.name,
                        label: decision.label,
                        confidence: decision.confidence(),
                    };
                    log::debug!(
                        "Batch {}: {} -> {} ({}%)",
                        id,
                        input.original_name,
                        result.label,
                        result.confidence
                    );
                    outcomes.push(PredictionOutcome::Classified(result));
                }
                Err(err) => {
                    let message = err.message();
                    let err = err.into_batch_error(index, input.original_name.clone());
                    if self.policy == FailurePolicy::FailFast {
                        log::error!("Batch {} aborted: {}", id, err);
                        return Err(err);
                    }
                    log::warn!("Batch {}: {}", id, err);
                    outcomes.push(PredictionOutcome::Failed(FailedPrediction {
                        filename: stored.name,
                        error: message,
                    }));
                }
            }
        }

        log::info!(
            "Batch {}: finished {} image(s) in {:?}",
            id,
            outcomes.len(),
            started.elapsed()
        );
        Ok(ResultBatch { id, outcomes })
    }

    fn classify(&self, path: &std::path::Path) -> Result<f32, ItemError> {
        let tensor = self.normalizer.normalize_file(path).map_err(ItemError::Decode)?;
        self.classifier.predict(&tensor).map_err(ItemError::Inference)
    }
}
