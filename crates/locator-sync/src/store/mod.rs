//! Remote store contract and the in-process implementation.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{FeedSink, RemoteStore, SubscriptionHandle};
