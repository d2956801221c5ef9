//! Persistence for tasks, per-chat reminder settings and tracked bot messages.

pub mod db;
pub mod store;
