//! Post-retrieval side of the pipeline: compression stages, the stage
//! pipeline, the [`Retriever`] that ties search and compression together,
//! and rendering of the final context for a generator.

pub mod compression;
pub mod context;
pub mod orchestrator;
pub mod pipeline;

pub use context::{render_context, Source};
pub use orchestrator::{ContextOutcome, Diagnostics, RetrievedContext, Retriever};
pub use pipeline::{CompressionPipeline, PipelineOutcome};
