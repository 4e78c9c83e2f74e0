//! Conversational turn handling for client connections

pub mod aggregator;
pub mod coordinator;
pub mod history;
pub mod pool;
pub mod protocol;
pub mod registry;

use std::fmt;

use serde::Serialize;

pub use aggregator::{AggregatorPolicy, AudioAggregator, Check};
pub use coordinator::{APOLOGY, CoordinatorHandle, CoordinatorSettings, TurnCoordinator};
pub use history::{ConversationState, Role, Turn};
pub use pool::{StageTimeouts, WorkerPool};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{Connection, ConnectionRegistry};

/// Where a connection's turn currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Recognizing,
    Generating,
    Synthesizing,
    Delivering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recognizing => "recognizing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Delivering => "delivering",
        };
        f.write_str(name)
    }
}
