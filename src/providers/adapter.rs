//! Activity fetch adapters
//!
//! [`ActivitySource`] is the seam between the orchestrator and provider APIs.
//! [`HttpActivitySource`] reads a provider's activity feed as described by its
//! [`FeedSpec`] and maps items into [`NewActivity`] records.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::instrument;

use crate::error::SyncCoreError;
use crate::providers::registry::{FeedMethod, FeedSpec, ProviderDefinition};
use crate::repositories::NewActivity;

/// Fetches items created or updated after `since` for one connected account
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_since(
        &self,
        definition: &ProviderDefinition,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewActivity>, SyncCoreError>;
}

/// Generic JSON feed reader driven by the provider's [`FeedSpec`]
#[derive(Debug, Clone)]
pub struct HttpActivitySource {
    http: reqwest::Client,
}

impl HttpActivitySource {
    pub fn new(call_timeout: Duration) -> Result<Self, SyncCoreError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .user_agent(concat!("connector-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncCoreError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ActivitySource for HttpActivitySource {
    #[instrument(skip(self, definition, access_token), fields(provider = %definition.kind))]
    async fn fetch_since(
        &self,
        definition: &ProviderDefinition,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewActivity>, SyncCoreError> {
        let provider = definition.kind.as_str();
        let feed = &definition.feed;

        let base = definition.api_base.as_str().trim_end_matches('/');
        let mut url = url::Url::parse(&format!("{}{}", base, feed.path))
            .map_err(|e| SyncCoreError::Internal(format!("invalid feed URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in feed.static_query {
                query.append_pair(key, value);
            }
            if let (Some(param), Some(since)) = (feed.since_param, since) {
                query.append_pair(param, &since.to_rfc3339());
            }
        }
        // Drop the dangling `?` when no pairs were appended
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut request = match feed.method {
            FeedMethod::Get => self.http.get(url),
            FeedMethod::Post => self.http.post(url).json(&serde_json::json!({
                "sort": { "direction": "descending", "timestamp": "last_edited_time" },
                "page_size": 100
            })),
        };
        request = request.bearer_auth(access_token);
        for (name, value) in feed.headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncCoreError::provider_transport(provider, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncCoreError::provider_transport(provider, e))?;

        if !status.is_success() {
            if status.as_u16() == 401 {
                tracing::warn!("Provider rejected access token");
            } else {
                tracing::warn!(status = status.as_u16(), "Provider feed request failed");
            }
            return Err(SyncCoreError::provider_status(provider, status.as_u16(), &body));
        }

        let document: Value = serde_json::from_str(&body).map_err(|e| SyncCoreError::ProviderApi {
            provider: provider.to_string(),
            status: Some(status.as_u16()),
            retryable: false,
            message: format!("unparseable feed response: {}", e),
        })?;

        check_embedded_error(provider, &document)?;

        let items = parse_items(feed, &document, since);
        tracing::debug!(count = items.len(), "Fetched provider activity");
        Ok(items)
    }
}

/// Some APIs answer 200 with `{"ok": false, "error": "..."}`
fn check_embedded_error(provider: &str, document: &Value) -> Result<(), SyncCoreError> {
    if document.get("ok").and_then(Value::as_bool) != Some(false) {
        return Ok(());
    }

    let error = document
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let status = match error {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired" | "account_inactive" => {
            401
        }
        "ratelimited" => 429,
        _ => 400,
    };
    Err(SyncCoreError::provider_status(provider, status, error))
}

/// Map feed items into activity records, skipping items without an id or timestamp
fn parse_items(feed: &FeedSpec, document: &Value, since: Option<DateTime<Utc>>) -> Vec<NewActivity> {
    let items = match document.pointer(feed.items_pointer).and_then(Value::as_array) {
        Some(items) => items,
        None => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let external_id = item.pointer(feed.id_pointer).and_then(value_to_string)?;
            let occurred_at = item.pointer(feed.time_pointer).and_then(parse_timestamp)?;
            let title = item
                .pointer(feed.title_pointer)
                .and_then(Value::as_str)
                .filter(|title| !title.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| external_id.clone());
            let url = item
                .pointer(feed.url_pointer)
                .and_then(Value::as_str)
                .map(str::to_string);

            Some(NewActivity {
                external_id,
                kind: feed.kind.to_string(),
                title,
                url,
                occurred_at,
                payload: Some(item.clone()),
            })
        })
        // Feeds without a server-side lower bound are filtered here
        .filter(|activity| since.is_none_or(|since| activity.occurred_at > since))
        .collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 strings, epoch seconds, or Slack style `"1512085950.000216"`
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<f64>().ok().and_then(epoch_to_datetime)),
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderKind;
    use crate::providers::registry::build_definition;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn definition(kind: ProviderKind, api_base: &str) -> ProviderDefinition {
        build_definition(kind, "id".into(), "secret".into(), None, Some(api_base)).unwrap()
    }

    fn source() -> HttpActivitySource {
        HttpActivitySource::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn timestamps_in_all_supported_shapes() {
        let rfc = parse_timestamp(&json!("2025-01-02T03:04:05Z")).unwrap();
        assert_eq!(rfc.timestamp(), 1_735_787_045);

        let epoch = parse_timestamp(&json!(1_512_085_950)).unwrap();
        assert_eq!(epoch.timestamp(), 1_512_085_950);

        let slack = parse_timestamp(&json!("1512085950.000216")).unwrap();
        assert_eq!(slack.timestamp(), 1_512_085_950);

        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }

    #[tokio::test]
    async fn github_issues_are_mapped_and_since_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/issues"))
            .and(query_param("since", "2025-01-01T00:00:00+00:00"))
            .and(header("authorization", "Bearer gh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 101,
                    "title": "Fix login",
                    "html_url": "https://github.com/o/r/issues/1",
                    "updated_at": "2025-01-05T10:00:00Z"
                },
                {
                    "id": 102,
                    "title": "",
                    "html_url": "https://github.com/o/r/issues/2",
                    "updated_at": "2025-01-06T10:00:00Z"
                },
                { "title": "no id", "updated_at": "2025-01-06T10:00:00Z" }
            ])))
            .mount(&server)
            .await;

        let since = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let items = source()
            .fetch_since(
                &definition(ProviderKind::Github, &server.uri()),
                "gh-token",
                Some(since),
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].external_id, "101");
        assert_eq!(items[0].title, "Fix login");
        assert_eq!(items[0].kind, "issue");
        // Empty titles fall back to the id
        assert_eq!(items[1].title, "102");
    }

    #[tokio::test]
    async fn slack_items_older_than_since_are_filtered_locally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stars.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "items": [
                    { "date_create": 1_700_000_000, "message": { "text": "old", "permalink": "https://s/1" } },
                    { "date_create": 1_800_000_000, "message": { "text": "new", "permalink": "https://s/2" } }
                ]
            })))
            .mount(&server)
            .await;

        let since = Utc.timestamp_opt(1_750_000_000, 0).unwrap();
        let items = source()
            .fetch_since(&definition(ProviderKind::Slack, &server.uri()), "t", Some(since))
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "new");
    }

    #[tokio::test]
    async fn upstream_failures_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = source()
            .fetch_since(&definition(ProviderKind::Github, &server.uri()), "t", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
            .mount(&server)
            .await;

        let err = source()
            .fetch_since(&definition(ProviderKind::Github, &server.uri()), "t", None)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, SyncCoreError::ProviderApi { status: Some(401), .. }));
    }

    #[tokio::test]
    async fn embedded_slack_error_is_not_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "invalid_auth" })),
            )
            .mount(&server)
            .await;

        let err = source()
            .fetch_since(&definition(ProviderKind::Slack, &server.uri()), "t", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncCoreError::ProviderApi { status: Some(401), .. }));
    }
}
