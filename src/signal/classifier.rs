//! Black-box classifier contract.
//!
//! The engine never runs inference itself; producers invoke a classifier
//! per video frame or audio segment and push the resulting
//! [`RawClassification`] into the session. The trait captures only the
//! output contract, so a scripted mock substitutes for a real model in
//! tests and replay tooling.

use std::collections::VecDeque;

use thiserror::Error;

use super::types::RawClassification;

/// Errors a classifier invocation can surface
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("inference error: {0}")]
    Inference(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Input handed to a classifier. The engine treats it as opaque.
pub enum ClassifierInput<'a> {
    VideoFrame {
        data: &'a [u8],
        width: u32,
        height: u32,
    },
    AudioSegment {
        samples: &'a [f32],
        sample_rate: u32,
    },
}

/// Per-frame / per-segment emotion classifier.
///
/// Latency and implementation are the collaborator's concern; the engine
/// assumes only this output contract.
pub trait EmotionClassifier: Send {
    fn classify(&mut self, input: ClassifierInput<'_>) -> Result<RawClassification, ClassifierError>;
}

/// Classifier that replays a scripted sequence of outputs
pub struct ScriptedClassifier {
    outputs: VecDeque<RawClassification>,
}

impl ScriptedClassifier {
    pub fn new(outputs: Vec<RawClassification>) -> Self {
        Self {
            outputs: outputs.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.outputs.len()
    }
}

impl EmotionClassifier for ScriptedClassifier {
    fn classify(&mut self, _input: ClassifierInput<'_>) -> Result<RawClassification, ClassifierError> {
        self.outputs
            .pop_front()
            .ok_or_else(|| ClassifierError::Inference("script exhausted".to_string()))
    }
}
