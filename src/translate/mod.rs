//! Format translation between the canonical chat format and each backend
//! family.
//!
//! Every function here is pure (no I/O); remote images are resolved before
//! conversion starts.

pub mod ai21;
pub mod canonical_types;
pub mod claude;
pub mod claude_request;
pub mod claude_response;
pub mod claude_streaming;
pub mod claude_types;
pub mod llama;
pub mod mistral;
pub mod prompt;
pub mod text_stream;
pub mod titan;
