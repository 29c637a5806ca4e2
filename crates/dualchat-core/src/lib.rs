pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod model;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use api::{ChatApiClient, ChatRequest, ChatResponse, ChatTransport};
pub use config::Config;
pub use controller::{ChatController, ChatState};
pub use error::TransportError;
pub use history::{FileStore, HistoryStore, KeyValueStore, MemoryStore};
pub use model::{ModelId, ViewMode};
pub use state::{ChatRole, Message, MessageId, Session};
pub use stream::{parse_event, FrameDecoder, StreamEvent};
