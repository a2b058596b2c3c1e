//! Optional LLM collaborator.
//!
//! An external bridge process wraps the model provider. Requests and
//! responses travel as NDJSON envelopes over the bridge's stdin/stdout,
//! and the answer is parsed into a [`SemanticAlignment`]. Every failure
//! here is recoverable: callers fall back to [`heuristic_alignment`].

pub mod alignment;
pub mod client;
pub mod error;
pub mod protocol;

pub use alignment::{
    apply_alignment, heuristic_alignment, parse_response, request_alignment, AlignmentSource,
    SemanticAlignment, SemanticDimension, SemanticMetric, TimeAnalysis, TimeRange,
};
pub use client::{LlmClient, ProcessLlmClient};
pub use error::{LlmError, LlmResult};
