//! Wire-level chat protocol.

mod events;

pub use events::{
    ClientEvent, FileAttachment, Question, QuestionOption, ServerEvent, TokenUsage,
};
