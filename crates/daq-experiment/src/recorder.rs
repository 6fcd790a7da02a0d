//! In-memory document capture.

use crate::run_engine::{RunEngine, SubscriptionId};
use daq_core::{Document, DocumentKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every document a [`RunEngine`] emits, in emission order.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct DocumentRecorder {
    documents: Arc<Mutex<Vec<Document>>>,
}

impl DocumentRecorder {
    /// Empty recorder not attached to anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// New recorder subscribed to `engine`.
    pub fn attach(engine: &RunEngine) -> Self {
        let recorder = Self::new();
        recorder.subscribe(engine);
        recorder
    }

    /// Subscribe this recorder to `engine` as a synchronous callback.
    pub fn subscribe(&self, engine: &RunEngine) -> SubscriptionId {
        let sink = self.clone();
        engine.subscribe_callback(move |doc| sink.record(doc))
    }

    /// Append one document.
    pub fn record(&self, doc: &Document) {
        self.documents.lock().push(doc.clone());
    }

    /// Snapshot of everything recorded so far.
    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().clone()
    }

    /// Kinds of the recorded documents, in order.
    pub fn kinds(&self) -> Vec<DocumentKind> {
        self.documents.lock().iter().map(Document::kind).collect()
    }

    /// Number of documents recorded.
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.documents.lock().clear();
    }
}
