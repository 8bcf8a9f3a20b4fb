//! Chat provider abstractions and test doubles.

mod mock;
mod provider;

pub use mock::{MockBehavior, MockChatProvider, ScriptedResolver};
pub use provider::{ChatOptions, ChatProvider, ChunkStream, Message, Role};
