//! OAuth coordination: authorization URLs, code exchange, refresh and revocation.
//!
//! Exchange and refresh perform exactly one request each and surface provider
//! rejections as [`SyncCoreError::OAuthExchange`] with the provider's body.
//! Revocation never fails from the caller's point of view.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::error::SyncCoreError;
use crate::providers::ProviderKind;
use crate::providers::registry::{
    ProviderDefinition, ProviderRegistry, RevokeStyle, TokenAuthStyle,
};
use crate::vault::TokenBundle;

const MAX_AUTHORIZE_URL_LEN: usize = 2048;
const USER_AGENT: &str = concat!("connector-sync/", env!("CARGO_PKG_VERSION"));

/// Token endpoint response, tolerant of provider-specific extras
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthCoordinator {
    registry: Arc<ProviderRegistry>,
    http: reqwest::Client,
    public_base_url: String,
}

impl OAuthCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        public_base_url: &str,
        call_timeout: Duration,
    ) -> Result<Self, SyncCoreError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncCoreError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            http,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Callback URI registered with the provider
    pub fn redirect_uri(&self, provider: ProviderKind) -> String {
        format!("{}/oauth/{}/callback", self.public_base_url, provider)
    }

    /// Build the provider's authorization URL for `state`. Performs no I/O.
    pub fn get_authorization_url(
        &self,
        provider: ProviderKind,
        state: &str,
    ) -> Result<Url, SyncCoreError> {
        let definition = self.registry.get(provider)?;
        let mut url = definition.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &definition.client_id)
                .append_pair("redirect_uri", &self.redirect_uri(provider))
                .append_pair("response_type", "code")
                .append_pair("state", state);
            if !definition.scopes.is_empty() {
                query.append_pair("scope", &definition.scope_string());
            }
            for (key, value) in &definition.extra_authorize_params {
                query.append_pair(key, value);
            }
        }

        validate_authorize_url(&url)?;
        Ok(url)
    }

    /// Exchange an authorization code for tokens. Not retried.
    #[instrument(skip(self, code), fields(provider = %provider))]
    pub async fn exchange_code_for_tokens(
        &self,
        provider: ProviderKind,
        code: &str,
    ) -> Result<TokenBundle, SyncCoreError> {
        let definition = self.registry.get(provider)?;
        let redirect_uri = self.redirect_uri(provider);
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ];

        let result = self
            .token_request(&definition, &params)
            .await
            .and_then(|response| bundle_from_response(provider, response, None));

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "oauth_exchanges_total",
            "provider" => provider.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    /// Mint a new access token from a refresh token.
    ///
    /// Providers without refresh support yield [`SyncCoreError::ReauthRequired`].
    #[instrument(skip(self, refresh_token), fields(provider = %provider))]
    pub async fn refresh(
        &self,
        provider: ProviderKind,
        refresh_token: &str,
    ) -> Result<TokenBundle, SyncCoreError> {
        let definition = self.registry.get(provider)?;
        if !definition.supports_refresh {
            return Err(SyncCoreError::reauth(
                provider.as_str(),
                "provider does not support token refresh",
            ));
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self.token_request(&definition, &params).await?;
        bundle_from_response(provider, response, Some(refresh_token))
    }

    pub fn supports_refresh(&self, provider: ProviderKind) -> bool {
        self.registry
            .get(provider)
            .map(|definition| definition.supports_refresh)
            .unwrap_or(false)
    }

    /// Best-effort remote revocation. Failures are logged and swallowed.
    #[instrument(skip(self, token), fields(provider = %provider))]
    pub async fn revoke_token(&self, provider: ProviderKind, token: &str) {
        let definition = match self.registry.get(provider) {
            Ok(definition) => definition,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping revocation for unregistered provider");
                return;
            }
        };
        let Some((endpoint, style)) = definition.revoke_endpoint.clone() else {
            tracing::debug!("Provider has no revocation endpoint");
            return;
        };

        let request = match style {
            RevokeStyle::FormToken => self.http.post(endpoint).form(&[("token", token)]),
            RevokeStyle::BearerPost => self.http.post(endpoint).bearer_auth(token),
            RevokeStyle::GrantDelete => self
                .http
                .delete(endpoint)
                .basic_auth(&definition.client_id, Some(&definition.client_secret))
                .header("Accept", "application/vnd.github+json")
                .json(&serde_json::json!({ "access_token": token })),
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Revoked provider token");
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status, %body, "Provider rejected token revocation");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Token revocation request failed");
            }
        }
    }

    async fn token_request(
        &self,
        definition: &ProviderDefinition,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, SyncCoreError> {
        let provider = definition.kind.as_str();
        let request = self
            .http
            .post(definition.token_endpoint.clone())
            .header("Accept", "application/json");

        let request = match definition.token_auth {
            TokenAuthStyle::ClientSecretPost => {
                let mut form: Vec<(&str, &str)> = params.to_vec();
                form.push(("client_id", definition.client_id.as_str()));
                form.push(("client_secret", definition.client_secret.as_str()));
                request.form(&form)
            }
            TokenAuthStyle::BasicAuthJson => {
                let body: serde_json::Map<String, serde_json::Value> = params
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                    .collect();
                request
                    .basic_auth(&definition.client_id, Some(&definition.client_secret))
                    .json(&body)
            }
        };

        let response = request.send().await.map_err(|e| SyncCoreError::OAuthExchange {
            provider: provider.to_string(),
            status: None,
            body: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SyncCoreError::OAuthExchange {
                provider: provider.to_string(),
                status: Some(status),
                body: e.to_string(),
            })?;

        if !(200..300).contains(&status) {
            tracing::warn!(status, "Token endpoint returned an error");
            return Err(SyncCoreError::OAuthExchange {
                provider: provider.to_string(),
                status: Some(status),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| SyncCoreError::OAuthExchange {
            provider: provider.to_string(),
            status: Some(status),
            body: format!("unparseable token response ({}): {}", e, body),
        })
    }
}

fn bundle_from_response(
    provider: ProviderKind,
    response: TokenResponse,
    previous_refresh_token: Option<&str>,
) -> Result<TokenBundle, SyncCoreError> {
    // Some providers report OAuth errors inside a 2xx body
    if let Some(error) = response.error {
        let body = match response.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(SyncCoreError::OAuthExchange {
            provider: provider.as_str().to_string(),
            status: Some(400),
            body,
        });
    }

    let access_token = response
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| SyncCoreError::OAuthExchange {
            provider: provider.as_str().to_string(),
            status: Some(400),
            body: "token response did not include an access_token".to_string(),
        })?;

    Ok(TokenBundle {
        access_token,
        refresh_token: response
            .refresh_token
            .or_else(|| previous_refresh_token.map(str::to_string)),
        expires_at: response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        scope: response.scope,
    })
}

/// Validate authorization URL meets OAuth 2.0 and security requirements
fn validate_authorize_url(url: &Url) -> Result<(), SyncCoreError> {
    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    if url.scheme() != "https" && !loopback {
        return Err(SyncCoreError::Internal(
            "authorization URL must use HTTPS".to_string(),
        ));
    }

    // RFC 6749 section 3.1
    if url.fragment().is_some() {
        return Err(SyncCoreError::Internal(
            "authorization URL must not include a fragment".to_string(),
        ));
    }

    if url.as_str().len() > MAX_AUTHORIZE_URL_LEN {
        return Err(SyncCoreError::Internal(
            "authorization URL exceeds 2048 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::registry::build_definition;

    fn coordinator() -> OAuthCoordinator {
        let mut registry = ProviderRegistry::new();
        for kind in ProviderKind::ALL {
            registry.register(
                build_definition(kind, format!("{}-id", kind), "secret".into(), None, None)
                    .unwrap(),
            );
        }
        OAuthCoordinator::new(
            Arc::new(registry),
            "https://sync.example.com/",
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn authorization_url_embeds_client_scope_redirect_and_state() {
        let url = coordinator()
            .get_authorization_url(ProviderKind::Github, "state-123")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(pairs["client_id"], "github-id");
        assert_eq!(pairs["state"], "state-123");
        assert_eq!(pairs["scope"], "repo read:user");
        assert_eq!(
            pairs["redirect_uri"],
            "https://sync.example.com/oauth/github/callback"
        );
    }

    #[test]
    fn google_requests_offline_access() {
        let url = coordinator()
            .get_authorization_url(ProviderKind::GoogleCalendar, "s")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["access_type"], "offline");
    }

    #[test]
    fn authorization_url_is_deterministic() {
        let coordinator = coordinator();
        let a = coordinator
            .get_authorization_url(ProviderKind::Slack, "same")
            .unwrap();
        let b = coordinator
            .get_authorization_url(ProviderKind::Slack, "same")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn refresh_keeps_previous_token_when_not_rotated() {
        let response = TokenResponse {
            access_token: Some("new-access".into()),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
            error: None,
            error_description: None,
        };
        let bundle =
            bundle_from_response(ProviderKind::GoogleCalendar, response, Some("old-refresh"))
                .unwrap();
        assert_eq!(bundle.refresh_token.as_deref(), Some("old-refresh"));
        assert!(bundle.expires_at.is_some());
    }

    #[test]
    fn error_in_success_body_is_an_exchange_error() {
        let response = TokenResponse {
            access_token: None,
            refresh_token: None,
            expires_in: None,
            scope: None,
            error: Some("bad_verification_code".into()),
            error_description: Some("The code passed is incorrect or expired.".into()),
        };
        let err = bundle_from_response(ProviderKind::Github, response, None).unwrap_err();
        match err {
            SyncCoreError::OAuthExchange { body, .. } => {
                assert!(body.contains("bad_verification_code"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn authorize_url_validation() {
        assert!(validate_authorize_url(&Url::parse("https://ok.example/a").unwrap()).is_ok());
        assert!(validate_authorize_url(&Url::parse("http://127.0.0.1:8000/a").unwrap()).is_ok());
        assert!(validate_authorize_url(&Url::parse("http://evil.example/a").unwrap()).is_err());
        assert!(validate_authorize_url(&Url::parse("https://ok.example/a#frag").unwrap()).is_err());
    }
}
