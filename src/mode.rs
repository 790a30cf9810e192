//! Response mode selection

use crate::types::{ClassificationResult, Mode};

/// Maps a classification to a response mode. Pure: same input, same mode.
#[derive(Debug, Clone, Copy)]
pub struct ModeSelector {
    confidence_threshold: f32,
}

impl ModeSelector {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    pub fn select(&self, classification: &ClassificationResult) -> Mode {
        let intent = classification.intent;
        if intent.is_knowledge() && classification.confidence >= self.confidence_threshold {
            Mode::Knowledge
        } else if intent.is_conversational() {
            // conversational intents skip the confidence gate
            Mode::Conversational
        } else {
            Mode::Fallback
        }
    }
}
