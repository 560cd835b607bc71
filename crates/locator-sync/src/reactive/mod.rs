//! Reactive layer — snapshot-change notifications for presentation code.
//!
//! - [`event`] — [`ChangeEvent`] enum.
//! - [`notifier`] — [`ChangeNotifier`], synchronous pub/sub carrying the
//!   snapshot that resulted from each change.

pub mod event;
pub mod notifier;

pub use event::ChangeEvent;
pub use notifier::{ChangeNotifier, ListenerId};
