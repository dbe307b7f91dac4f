//! Command handlers

pub mod config;
pub mod edit;
pub mod note;
pub mod remote;
pub mod watch;
