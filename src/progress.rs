//! Structured progress notifications for chunking, embedding, and retrieval.
//!
//! An external logging/UI layer consumes these events; the core never writes
//! to the terminal itself. Embedding progress is coalesced to one event per
//! completed batch so event volume stays independent of chunk count.

/// Retrieval-stage boundary markers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetrievalStage {
    Filtering,
    Searching,
    Assembling,
}

/// A single progress event from the pipeline.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Chunking has started for a tab; counts describe the inputs.
    ChunkingStarted {
        tab_id: String,
        sections: usize,
        components: usize,
    },
    /// Chunking finished with this many top-level chunks.
    ChunkingFinished { tab_id: String, chunks: usize },
    /// One embedding batch completed; counters are running totals summed
    /// across all workers.
    EmbeddingProgress { completed: usize, total: usize },
    /// A retrieval stage boundary was crossed.
    RetrievalStage { stage: RetrievalStage },
}

/// Receives progress events. Implementations must be cheap and non-blocking;
/// they are called from the pipeline's hot path.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for hosts that do not surface progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Reporter that forwards events to `tracing` at debug level.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ChunkingStarted {
                tab_id,
                sections,
                components,
            } => {
                tracing::debug!(%tab_id, sections, components, "chunking started");
            }
            ProgressEvent::ChunkingFinished { tab_id, chunks } => {
                tracing::debug!(%tab_id, chunks, "chunking finished");
            }
            ProgressEvent::EmbeddingProgress { completed, total } => {
                tracing::debug!(completed, total, "embedding progress");
            }
            ProgressEvent::RetrievalStage { stage } => {
                tracing::debug!(?stage, "retrieval stage");
            }
        }
    }
}
