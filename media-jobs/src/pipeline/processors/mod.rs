//! Per-kind job processors.

mod join;
mod mix;
mod render;
mod split;
mod traits;
mod transcribe;

pub use join::JoinProcessor;
pub use mix::MixAudioProcessor;
pub use render::RenderSubtitlesProcessor;
pub use split::SplitProcessor;
pub use traits::{Processor, ProcessorContext, ResourceBudget};
pub use transcribe::TranscribeProcessor;

use std::collections::HashMap;
use std::sync::Arc;

use crate::job::JobKind;

/// Maps each job kind to the processor that runs it.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a processor for every job kind.
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(TranscribeProcessor))
            .with(Arc::new(RenderSubtitlesProcessor))
            .with(Arc::new(SplitProcessor))
            .with(Arc::new(JoinProcessor))
            .with(Arc::new(MixAudioProcessor))
    }

    /// Register `processor`, replacing any previous one for its kind.
    pub fn with(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(processor.kind(), processor);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Processor>> {
        self.processors.get(&kind).cloned()
    }
}
