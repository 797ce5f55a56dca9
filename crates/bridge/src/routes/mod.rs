//! HTTP routes

pub mod commands;
pub mod hooks;
pub mod status;
