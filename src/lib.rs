pub mod chat_commands;
pub mod config;
pub mod retention;
pub mod runtime;
pub mod scheduler;
pub mod task_lifecycle;
pub mod telegram;

pub use nagger_app::logging;
pub use nagger_channels::notifier;
pub use nagger_channels::reminder;
pub use nagger_core::error;
pub use nagger_core::lifecycle;
pub use nagger_core::schedule;
pub use nagger_storage::db;
pub use nagger_storage::store;

#[cfg(test)]
pub mod test_support;
