//! # Core Module
//!
//! Configuration, credential encryption and shared formatting helpers for the
//! class reminder bot.

pub mod config;
pub mod crypto;
pub mod format;

// Re-export commonly used items
pub use config::Config;
pub use crypto::PasswordCipher;
pub use format::minutes_to_hhmm;
