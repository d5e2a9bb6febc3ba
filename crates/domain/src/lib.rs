//! `tp-domain`: configuration and agent-boundary types shared by the
//! toolpool crates.

pub mod config;
pub mod tool;
