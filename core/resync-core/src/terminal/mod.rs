//! Terminal session output streams.

pub mod buffer;
pub mod manager;

pub use buffer::OutputBuffer;
pub use manager::{TerminalOutcome, TerminalSlot, TerminalStreamManager, TerminalSummary};
