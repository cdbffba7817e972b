pub mod adapter;
pub mod config;
pub mod error;
pub mod factory;
pub mod images;
pub mod logging;
pub mod pipeline;
pub mod reassembler;
pub mod stream;
pub mod translate;
pub mod validation;

pub use adapter::{BackendFamily, ModelAdapter, StreamChunkConverter};
pub use config::{BridgeConfig, ParseErrorPolicy};
pub use error::{BridgeError, Result};
pub use factory::AdapterFactory;
pub use logging::init_tracing;
pub use pipeline::{Bridge, PreparedRequest};
pub use reassembler::StreamingReassembler;
pub use stream::reassemble_stream;
