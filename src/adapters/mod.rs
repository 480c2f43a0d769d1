//! Adapter interfaces for external systems.
//!
//! Adapters give the uploader and alerting code one interface over remote
//! storage and notification backends.

pub mod object_store;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

pub use object_store::HttpObjectStore;
pub use telegram::{TelegramClient, TelegramConfig};

/// Content type used for evidence recordings
pub const WAV_CONTENT_TYPE: &str = "audio/wav";

/// Content type used for rotated metrics files
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Remote blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Store `bytes` under `key`, attaching `metadata` pairs
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()>;
}

/// Short text notifications to a human
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, text: &str) -> Result<()>;
}
