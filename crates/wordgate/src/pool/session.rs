//! The browser-automation session contract. The script each session runs
//! against a task URL is an external collaborator (spec §1 Non-goals) — only
//! the lifecycle around it is specified here.

use async_trait::async_trait;
use std::path::Path;

use crate::error::PoolError;

/// One isolated headless-browser session bound to a slot's profile
/// directory.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// True if the underlying browser process/connection is still usable.
    fn is_connected(&self) -> bool;

    /// Runs the opaque per-offer automation script against `url`.
    async fn execute(&self, url: &str) -> Result<serde_json::Value, PoolError>;

    /// Closes the session, with the caller enforcing its own timeout.
    async fn close(&mut self) -> Result<(), PoolError>;
}

/// Creates sessions bound to a slot's profile directory. Production code
/// wires this to whatever launches the real browser; tests use a fake.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, profile_path: &Path) -> Result<Box<dyn BrowserSession>, PoolError>;
}
