use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::types::*;
use super::Inventory;

const PAGE_LIMIT: &str = "1000";

/// NetBox API client
pub struct NetBoxClient {
    base_url: String,
    token: String,
    client: Client,
}

impl NetBoxClient {
    pub fn new(url: String, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<PaginatedResponse<T>> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("NetBox API error {}: {}", status, body));
        }

        Ok(resp.json().await?)
    }

    /// GET a list endpoint and follow `next` links until every page is read.
    /// `query` goes on the first request only; `next` links already carry it.
    async fn list_paginated<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut page: PaginatedResponse<T> = self.get_page(&self.api_url(endpoint), query).await?;
        let mut results = std::mem::take(&mut page.results);

        while let Some(url) = page.next.take() {
            page = self.get_page(&url, &[]).await?;
            results.append(&mut page.results);
        }

        Ok(results)
    }

    /// Test connectivity to NetBox
    pub async fn test_connection(&self) -> bool {
        match self
            .client
            .get(self.api_url("/status/"))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // --- Devices ---

    pub async fn list_devices_by_tag(&self, tag: &str) -> Result<Vec<NbDevice>> {
        self.list_paginated("/dcim/devices/", &[("tag", tag), ("limit", PAGE_LIMIT)])
            .await
    }
}

#[async_trait]
impl Inventory for NetBoxClient {
    async fn devices_with_tag(&self, tag: &str) -> Result<Vec<InventoryDevice>> {
        let devices = self.list_devices_by_tag(tag).await?;
        let mut named = Vec::with_capacity(devices.len());
        for device in devices {
            let id = device.id;
            match device.into_inventory_device() {
                Some(d) => named.push(d),
                None => tracing::warn!("Skipping unnamed NetBox device (id={}) tagged '{}'", id, tag),
            }
        }
        Ok(named)
    }
}
