//! Message board persisted in GitHub issues.
//!
//! One fixed issue holds the board configuration (admin credentials and the
//! chat registry) as a fenced JSON block. Every chat is its own issue and
//! its comments are the chat messages.

pub mod board;
pub mod error;
pub mod github;
pub mod obfuscate;
pub mod services;
pub mod settings;
pub mod throttle;
pub mod validate;
