pub mod notifier;
pub mod reminder;
