use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("WhatsApp Web not ready: {0}")]
    NotReady(String),

    #[error("no selector matched for {operation}")]
    SelectorMissed { operation: &'static str },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("profile directory already in use: {0}")]
    ProfileLocked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// headless_chrome surfaces failures as anyhow errors; flatten them.
    pub fn browser(e: impl std::fmt::Display) -> Self {
        DriverError::Browser(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
