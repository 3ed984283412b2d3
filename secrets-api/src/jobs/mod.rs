//! Background jobs run alongside the listeners.

pub mod purge;

pub use purge::{purge_expired_task, spawn_purge_task};
