//! Core config, errors, wire protocol and call transcript model for KAI Assist.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
