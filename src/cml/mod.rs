pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::CmlClient;
pub use types::LabSummary;

/// Lab virtualization platform that can hand out a testbed for a running lab
#[async_trait]
pub trait LabPlatform: Send + Sync {
    /// Labs whose title matches exactly, in the order the platform lists them
    async fn find_labs_by_title(&self, title: &str) -> Result<Vec<LabSummary>>;

    /// The lab's connectivity descriptor as YAML text
    async fn export_testbed(&self, lab_id: &str) -> Result<String>;
}
