//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: Removes entries past the stale window at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
