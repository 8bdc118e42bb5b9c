//! Tapline - a transparent logging HTTP proxy
//!
//! Every request is forwarded to one configured upstream. Buffered responses
//! are relayed whole, event streams chunk by chunk, and each interaction ends
//! up as exactly one self-contained record in the interaction log.

pub mod application;
pub mod config;
pub mod error;
pub mod interaction;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
