pub mod engine;
pub mod state;
pub mod types;

pub use engine::SyncEngine;
pub use state::SyncState;
pub use types::{
    Draft, FeedStatus, SyncEngineOptions, SyncErrorCallback, WriteIntent, WriteOutcome,
};
