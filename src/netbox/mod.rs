pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::NetBoxClient;
pub use types::InventoryDevice;

/// Source of devices and their configuration context
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All named devices carrying the given tag slug
    async fn devices_with_tag(&self, tag: &str) -> Result<Vec<InventoryDevice>>;
}
