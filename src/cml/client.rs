use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::types::*;
use super::LabPlatform;

/// CML controller API client
pub struct CmlClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl CmlClient {
    pub fn new(url: String, verify_tls: bool, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    fn auth_header(&self) -> Result<String> {
        self.token
            .as_ref()
            .map(|t| format!("Bearer {}", t))
            .ok_or_else(|| anyhow::anyhow!("CML client is not authenticated"))
    }

    /// Exchange username/password for an API token
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url("/authenticate"))
            .json(&AuthRequest { username, password })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("CML authentication failed {}: {}", status, body));
        }

        let token: String = resp.json().await?;
        self.token = Some(token);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(self.api_url(path))
            .header("Authorization", self.auth_header()?)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("CML API error {}: {}", status, body));
        }

        Ok(resp)
    }

    // --- Labs ---

    pub async fn list_lab_ids(&self) -> Result<Vec<String>> {
        Ok(self.get("/labs?show_all=true").await?.json().await?)
    }

    pub async fn lab(&self, id: &str) -> Result<CmlLab> {
        Ok(self.get(&format!("/labs/{}", id)).await?.json().await?)
    }

    /// Export the lab's pyATS testbed as raw YAML text
    pub async fn pyats_testbed(&self, id: &str) -> Result<String> {
        Ok(self.get(&format!("/labs/{}/pyats_testbed", id)).await?.text().await?)
    }
}

#[async_trait]
impl LabPlatform for CmlClient {
    async fn find_labs_by_title(&self, title: &str) -> Result<Vec<LabSummary>> {
        let mut matches = Vec::new();
        for id in self.list_lab_ids().await? {
            let lab = self.lab(&id).await?;
            if lab.lab_title == title {
                matches.push(LabSummary::from(lab));
            }
        }
        Ok(matches)
    }

    async fn export_testbed(&self, lab_id: &str) -> Result<String> {
        self.pyats_testbed(lab_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn logged_in(server: &mut mockito::ServerGuard) -> CmlClient {
        let _auth = server
            .mock("POST", "/api/v0/authenticate")
            .match_body(Matcher::Json(serde_json::json!({"username": "admin", "password": "pw"})))
            .with_status(200)
            .with_body(r#""tok-1""#)
            .create_async()
            .await;

        let mut client = CmlClient::new(server.url(), true, Duration::from_secs(5)).unwrap();
        client.authenticate("admin", "pw").await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_find_labs_by_title_keeps_platform_order() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in(&mut server).await;

        let _list = server
            .mock("GET", "/api/v0/labs")
            .match_query(Matcher::UrlEncoded("show_all".into(), "true".into()))
            .match_header("authorization", "Bearer tok-1")
            .with_body(r#"["a1", "b2", "c3"]"#)
            .create_async()
            .await;
        let mut _labs = Vec::new();
        for (id, title) in [("a1", "Other"), ("b2", "Pipeline Lab"), ("c3", "Pipeline Lab")] {
            let mock = server
                .mock("GET", format!("/api/v0/labs/{}", id).as_str())
                .with_body(format!(r#"{{"id": "{}", "lab_title": "{}", "state": "STARTED"}}"#, id, title))
                .create_async()
                .await;
            _labs.push(mock);
        }

        let labs = client.find_labs_by_title("Pipeline Lab").await.unwrap();
        let ids: Vec<_> = labs.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "c3"]);
        assert_eq!(labs[0].state.as_deref(), Some("STARTED"));
    }

    #[tokio::test]
    async fn test_export_testbed_returns_raw_yaml() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in(&mut server).await;

        let _export = server
            .mock("GET", "/api/v0/labs/b2/pyats_testbed")
            .with_body("testbed:\n  name: Pipeline Lab\ndevices: {}\n")
            .create_async()
            .await;

        let yaml = client.export_testbed("b2").await.unwrap();
        assert!(yaml.starts_with("testbed:"));
    }

    #[tokio::test]
    async fn test_requests_fail_before_authentication() {
        let server = mockito::Server::new_async().await;
        let client = CmlClient::new(server.url(), true, Duration::from_secs(5)).unwrap();
        let err = client.list_lab_ids().await.unwrap_err();
        assert!(err.to_string().contains("not authenticated"));
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/api/v0/authenticate")
            .with_status(403)
            .with_body(r#"{"description": "Authentication failed!"}"#)
            .create_async()
            .await;

        let mut client = CmlClient::new(server.url(), true, Duration::from_secs(5)).unwrap();
        let err = client.authenticate("admin", "wrong").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
