//! Domain types shared by every Nagger crate: errors, the task lifecycle
//! state machine and reminder-time helpers.

pub mod error;
pub mod lifecycle;
pub mod schedule;
