//! Translation records, the per-node cache, and the prompts sent to the model.

pub mod cache;
pub mod prompts;

use crate::dom::NodeId;
use crate::overlay::OverlayId;

/// Where a record's translation is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBlock {
    /// In-page translation block inserted after the source paragraph.
    Paragraph(NodeId),
    Overlay(OverlayId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRecord {
    /// Substring of (or equal to) the owning node's text at creation time.
    pub original_text: String,
    pub translation_text: String,
    pub explanation_text: Option<String>,
    pub phonetic_text: Option<String>,
    pub block: RecordBlock,
}

impl TranslationRecord {
    pub fn new(original_text: impl Into<String>, translation_text: impl Into<String>, block: RecordBlock) -> Self {
        Self {
            original_text: original_text.into(),
            translation_text: translation_text.into(),
            explanation_text: None,
            phonetic_text: None,
            block,
        }
    }
}
