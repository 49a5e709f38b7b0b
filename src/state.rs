pub mod conversation;

pub use conversation::{
    ConversationLoop, ConversationState, DisplayEntry, DisplayKind, TurnOutcome, TurnUpdate,
};
