pub mod classifier;
pub mod normalizer;
pub mod types;

pub use classifier::{ClassifierError, ClassifierInput, EmotionClassifier, ScriptedClassifier};
pub use normalizer::{NormalizeError, Normalizer};
pub use types::{
    AlignedSignal, EmotionLabel, LabelDistribution, Modality, RawClassification, RecordedEvent,
    Signal,
};
