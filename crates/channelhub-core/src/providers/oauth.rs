//! Generic OAuth2 refresh-token grant.
//!
//! Platforms that only need a standard `grant_type=refresh_token` POST can be
//! registered straight from the `[[providers.oauth]]` config entries.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::registry::ProviderRegistry;
use super::traits::{SocialProvider, TokenResponse};
use crate::error::ProviderError;
use crate::storage::OAuthProviderConfig;

/// Client for one token endpoint.
#[derive(Debug, Clone)]
pub struct OAuth2Refresher {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuth2Refresher {
    /// # Errors
    /// Returns [`ProviderError::InvalidEndpoint`] unless `token_url` is an
    /// absolute http(s) URL.
    pub fn new(
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let invalid = |message: String| ProviderError::InvalidEndpoint {
            url: token_url.to_string(),
            message,
        };
        let parsed = Url::parse(token_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token_url: parsed,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchange `refresh` for a new token set.
    ///
    /// A response without a `refresh_token` keeps the one that was sent, as
    /// most platforms only rotate it occasionally.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenResponse, ProviderError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let description = body
                .get("error_description")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            return Err(ProviderError::Api(
                format!("OAuth refresh error: {error} {description}")
                    .trim_end()
                    .to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ProviderError::Api(format!("token endpoint returned {status}")));
        }

        Ok(TokenResponse {
            access_token: body
                .get("access_token")
                .and_then(|v| v.as_str())
                .map(String::from),
            refresh_token: body
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .map(String::from)
                .or_else(|| Some(refresh.to_string())),
            expires_in: body.get("expires_in").and_then(|v| v.as_i64()),
        })
    }
}

/// A provider with refresh support only: no analytics, pages or plugs.
#[derive(Debug, Clone)]
pub struct OAuth2Provider {
    identifier: String,
    refresher: OAuth2Refresher,
    refresh_wait: bool,
}

impl OAuth2Provider {
    pub fn new(identifier: impl Into<String>, refresher: OAuth2Refresher, refresh_wait: bool) -> Self {
        Self {
            identifier: identifier.into(),
            refresher,
            refresh_wait,
        }
    }

    pub fn from_config(cfg: &OAuthProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let refresher =
            OAuth2Refresher::new(&cfg.token_url, &cfg.client_id, &cfg.client_secret, timeout)?;
        Ok(Self::new(&cfg.identifier, refresher, cfg.refresh_wait))
    }
}

#[async_trait]
impl SocialProvider for OAuth2Provider {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        self.refresher.refresh(refresh_token).await
    }

    fn refresh_wait(&self) -> bool {
        self.refresh_wait
    }
}

/// Build a registry holding one [`OAuth2Provider`] per config entry.
pub fn registry_from_config(
    entries: &[OAuthProviderConfig],
    timeout: Duration,
) -> Result<ProviderRegistry, ProviderError> {
    let mut registry = ProviderRegistry::new();
    for cfg in entries {
        registry.register(Arc::new(OAuth2Provider::from_config(cfg, timeout)?));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn refresher(server: &mockito::ServerGuard) -> OAuth2Refresher {
        OAuth2Refresher::new(
            &format!("{}/oauth/token", server.url()),
            "client",
            "secret",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn refresh_posts_form_and_parses_triple() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-r".into()),
                Matcher::UrlEncoded("client_id".into(), "client".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-a","refresh_token":"new-r","expires_in":3600}"#)
            .create_async()
            .await;

        let tokens = refresher(&server).refresh("old-r").await.unwrap();
        mock.assert_async().await;
        let tokens = tokens.into_complete().unwrap();
        assert_eq!(tokens.access_token, "new-a");
        assert_eq!(tokens.refresh_token, "new-r");
        assert_eq!(tokens.expires_in, 3600);
    }

    #[tokio::test]
    async fn missing_refresh_token_keeps_the_old_one() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body(r#"{"access_token":"new-a","expires_in":60}"#)
            .create_async()
            .await;

        let tokens = refresher(&server).refresh("old-r").await.unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-r"));
    }

    #[tokio::test]
    async fn error_payload_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"revoked"}"#)
            .create_async()
            .await;

        let err = refresher(&server).refresh("old-r").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api(ref msg) if msg.contains("revoked")));
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = refresher(&server).refresh("old-r").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn rejects_non_http_endpoints() {
        let timeout = Duration::from_secs(1);
        assert!(matches!(
            OAuth2Refresher::new("not a url", "c", "s", timeout),
            Err(ProviderError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            OAuth2Refresher::new("ftp://example.com/token", "c", "s", timeout),
            Err(ProviderError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn registry_from_config_registers_each_entry() {
        let entries = vec![OAuthProviderConfig {
            identifier: "linkedin-page".into(),
            token_url: "https://www.linkedin.com/oauth/v2/accessToken".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_wait: true,
        }];
        let registry = registry_from_config(&entries, Duration::from_secs(1)).unwrap();
        let provider = registry.get("linkedin-page").unwrap();
        assert!(provider.refresh_wait());
        assert!(provider.analytics().is_none());
    }
}
