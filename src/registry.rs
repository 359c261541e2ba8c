use anyhow::{bail, Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::config::DOCKERHUB_API_BASE;

/// Registry-side repository metadata updates.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    async fn update_description(&self, update: &DescriptionUpdate) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptionUpdate {
    #[serde(skip)]
    pub namespace: String,
    #[serde(skip)]
    pub repository: String,
    pub description: String,
    pub full_description: String,
}

#[derive(Clone)]
pub struct DockerHubClient {
    base: String,
    username: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl DockerHubClient {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_base(DOCKERHUB_API_BASE, username, token)
    }

    pub fn with_base(base: impl Into<String>, username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            username: username.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Exchange the access token for a short-lived JWT.
    async fn login(&self) -> Result<String> {
        let resp = self
            .http
            .post(self.url("users/login"))
            .header(ACCEPT, "application/json")
            .json(&LoginRequest {
                username: &self.username,
                password: &self.token,
            })
            .send()
            .await
            .context("contacting Docker Hub")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Docker Hub login failed: {status}");
        }
        let body: LoginResponse = resp.json().await.context("decoding Docker Hub login response")?;
        Ok(body.token)
    }
}

#[async_trait::async_trait]
impl RegistryClient for DockerHubClient {
    async fn update_description(&self, update: &DescriptionUpdate) -> Result<()> {
        let jwt = self.login().await?;
        let url = self.url(&format!("repositories/{}/{}/", update.namespace, update.repository));
        tracing::info!(%url, "updating repository description");

        let resp = self
            .http
            .patch(&url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", jwt))
            .json(update)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("description update failed: {status} {body}");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let c = DockerHubClient::with_base("https://hub.example.com/v2/", "u", "t");
        assert_eq!(c.url("/users/login"), "https://hub.example.com/v2/users/login");
        assert_eq!(
            c.url("repositories/pdfix/autotag-textract/"),
            "https://hub.example.com/v2/repositories/pdfix/autotag-textract/"
        );
    }

    #[test]
    fn test_update_body_skips_path_fields() {
        let update = DescriptionUpdate {
            namespace: "pdfix".to_string(),
            repository: "autotag-textract".to_string(),
            description: "short".to_string(),
            full_description: "# Readme".to_string(),
        };
        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(body, serde_json::json!({ "description": "short", "full_description": "# Readme" }));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_an_error() {
        let c = DockerHubClient::with_base("http://127.0.0.1:9", "u", "t");
        let update = DescriptionUpdate {
            namespace: "n".to_string(),
            repository: "r".to_string(),
            description: String::new(),
            full_description: String::new(),
        };
        assert!(c.update_description(&update).await.is_err());
    }
}
