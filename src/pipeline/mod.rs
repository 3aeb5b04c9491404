//! Message processing pipeline
//!
//! ```text
//! source -> processor -> codec -> policy -> persist -> store
//!                 \                                   /
//!                  +--- on failure: ErrorRouter -----+
//! ```
//!
//! One message is fully processed before the next is taken from the source.

mod persist;
mod processor;
mod state;
pub mod processing_loop;
pub mod source;

pub use persist::{lag_minutes, parse_last_checked, persist, PersistOutcome};
pub use processing_loop::ProcessingLoop;
pub use processor::{ConsumerStats, MessageProcessor, ProcessingResult};
pub use source::{LineSource, MessageSource, ReplaySource, SourceEvent};
pub use state::{InvalidTransition, PipelineRun, PipelineState};
