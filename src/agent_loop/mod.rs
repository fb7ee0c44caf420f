//! The tool-calling conversation loop (turn state machine, events, driver).

pub mod events;
pub mod runner;
pub mod types;

pub use events::{TurnEvent, TurnEventPayload, TurnEventSink};
pub use runner::{failure_notice, ConversationDriver};
pub use types::*;
