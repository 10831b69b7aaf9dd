//! Per-node translation cache, bounded LRU.
//! Key: the source node. Lives for the page; a navigation drops it.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::TranslationRecord;
use crate::dom::NodeId;

/// What to do when a node with a record is selected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReusePlan {
    /// Selection lies inside the translated text: lexical lookup only.
    SubSelection,
    /// Same text as before: reuse as is.
    Identical,
    /// Selection is outside the translated text: discard and retranslate.
    Stale,
}

impl ReusePlan {
    pub fn plan(record: &TranslationRecord, selected: &str) -> Self {
        let selected = selected.trim();
        let original = record.original_text.trim();
        if selected == original {
            ReusePlan::Identical
        } else if !selected.is_empty() && original.contains(selected) {
            ReusePlan::SubSelection
        } else {
            ReusePlan::Stale
        }
    }
}

pub struct TranslationCache {
    inner: Mutex<LruCache<NodeId, TranslationRecord>>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn lookup(&self, node: NodeId) -> Option<TranslationRecord> {
        self.inner.lock().get(&node).cloned()
    }

    /// Store a record for `node`, replacing any previous one.
    /// `node_text` is the node's current text; a record whose original text
    /// is not part of it is refused.
    pub fn store(&self, node: NodeId, node_text: &str, record: TranslationRecord) -> bool {
        if !node_text.contains(record.original_text.trim()) {
            warn!(?node, "refusing record whose text is not in its node");
            return false;
        }
        debug!(?node, chars = record.original_text.chars().count(), "translation record stored");
        self.inner.lock().put(node, record);
        true
    }

    /// Mutate an existing record in place (late phonetic / explanation results).
    pub fn update(&self, node: NodeId, f: impl FnOnce(&mut TranslationRecord)) -> bool {
        match self.inner.lock().get_mut(&node) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, node: NodeId) -> Option<TranslationRecord> {
        self.inner.lock().pop(&node)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
