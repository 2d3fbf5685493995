pub mod completion;
pub mod stream_id;
pub mod stream_manager;
pub mod tcp_tracker;

pub use completion::{CompletedFlow, CompletionCollector, CompletionReason, IncompleteFlow};
pub use stream_id::FlowKey;
pub use stream_manager::StreamManager;
pub use tcp_tracker::{FlowPhase, TcpTracker, Transition};
