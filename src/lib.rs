//! Hide the mouse pointer after a period of inactivity and restore it on
//! activity.
//!
//! The core is [`watcher::Watcher`], a small state machine driven by a
//! periodic tick on a [`scheduler::MainLoop`] and by activity signals from a
//! host-provided [`host::Tracker`].

pub mod clock;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod scheduler;
pub mod signal;
pub mod sim;
pub mod utils;
pub mod watcher;
