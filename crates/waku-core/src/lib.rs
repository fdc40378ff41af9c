//! Core types, config, errors, session model, and pairing relay for Waku.

pub mod config;
pub mod error;
pub mod media;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod types;
