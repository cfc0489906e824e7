//! Turns the server's event stream into an ordered transcript.

mod transcript;
mod updates;

pub use transcript::{reduce, Transcript};
pub use updates::{PendingQuestion, TranscriptUpdate, TurnOutcome};
