//! Provider registry
//!
//! Static endpoint catalogue for each [`ProviderKind`] combined with the OAuth
//! client credentials from configuration. Built once at startup; an enabled
//! provider without a client id or secret fails construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;

use crate::config::AppConfig;
use crate::error::SyncCoreError;
use crate::providers::ProviderKind;

/// Error type for registry construction
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{name}' is not a supported provider")]
    UnknownProvider { name: String },
    #[error("Provider '{provider}' is enabled but has no client id")]
    MissingClientId { provider: ProviderKind },
    #[error("Provider '{provider}' is enabled but has no client secret")]
    MissingClientSecret { provider: ProviderKind },
    #[error("Provider '{provider}' has an invalid endpoint '{url}': {source}")]
    InvalidEndpoint {
        provider: ProviderKind,
        url: String,
        source: url::ParseError,
    },
}

/// How client credentials are presented to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAuthStyle {
    /// `client_id` and `client_secret` in the form body
    ClientSecretPost,
    /// HTTP Basic credentials with a JSON body
    BasicAuthJson,
}

/// How a token is revoked remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeStyle {
    /// POST `token=<t>` as a form
    FormToken,
    /// POST with the token as bearer credentials
    BearerPost,
    /// DELETE the application grant with client Basic auth and a JSON body
    GrantDelete,
}

/// HTTP method used by an activity feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMethod {
    Get,
    Post,
}

/// Where a provider exposes its activity and how to read items out of it.
///
/// Field locations are JSON pointers relative to each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub method: FeedMethod,
    pub path: &'static str,
    pub static_query: &'static [(&'static str, &'static str)],
    pub headers: &'static [(&'static str, &'static str)],
    /// Query parameter carrying the RFC 3339 lower bound, when supported
    pub since_param: Option<&'static str>,
    pub items_pointer: &'static str,
    pub id_pointer: &'static str,
    pub title_pointer: &'static str,
    pub url_pointer: &'static str,
    pub time_pointer: &'static str,
    pub kind: &'static str,
}

/// Built-in endpoint defaults for a provider
struct Catalogue {
    oauth_base: &'static str,
    authorize_path: &'static str,
    token_base: &'static str,
    token_path: &'static str,
    revoke: Option<(&'static str, &'static str, RevokeStyle)>,
    api_base: &'static str,
    scopes: &'static [&'static str],
    scope_separator: &'static str,
    extra_authorize_params: &'static [(&'static str, &'static str)],
    token_auth: TokenAuthStyle,
    supports_refresh: bool,
    feed: FeedSpec,
}

fn catalogue(kind: ProviderKind) -> Catalogue {
    match kind {
        ProviderKind::Github => Catalogue {
            oauth_base: "https://github.com",
            authorize_path: "/login/oauth/authorize",
            token_base: "https://github.com",
            token_path: "/login/oauth/access_token",
            // Path is completed with the client id when revoking
            revoke: Some(("https://api.github.com", "/applications", RevokeStyle::GrantDelete)),
            api_base: "https://api.github.com",
            scopes: &["repo", "read:user"],
            scope_separator: " ",
            extra_authorize_params: &[],
            token_auth: TokenAuthStyle::ClientSecretPost,
            supports_refresh: false,
            feed: FeedSpec {
                method: FeedMethod::Get,
                path: "/issues",
                static_query: &[("filter", "all"), ("state", "all"), ("per_page", "100")],
                headers: &[("Accept", "application/vnd.github+json")],
                since_param: Some("since"),
                items_pointer: "",
                id_pointer: "/id",
                title_pointer: "/title",
                url_pointer: "/html_url",
                time_pointer: "/updated_at",
                kind: "issue",
            },
        },
        ProviderKind::Slack => Catalogue {
            oauth_base: "https://slack.com",
            authorize_path: "/oauth/v2/authorize",
            token_base: "https://slack.com",
            token_path: "/api/oauth.v2.access",
            revoke: Some(("https://slack.com", "/api/auth.revoke", RevokeStyle::BearerPost)),
            api_base: "https://slack.com/api",
            scopes: &["channels:history", "channels:read", "stars:read", "users:read"],
            scope_separator: ",",
            extra_authorize_params: &[],
            token_auth: TokenAuthStyle::ClientSecretPost,
            supports_refresh: false,
            feed: FeedSpec {
                method: FeedMethod::Get,
                path: "/stars.list",
                static_query: &[("limit", "100")],
                headers: &[],
                since_param: None,
                items_pointer: "/items",
                id_pointer: "/message/permalink",
                title_pointer: "/message/text",
                url_pointer: "/message/permalink",
                time_pointer: "/date_create",
                kind: "starred_message",
            },
        },
        ProviderKind::Notion => Catalogue {
            oauth_base: "https://api.notion.com",
            authorize_path: "/v1/oauth/authorize",
            token_base: "https://api.notion.com",
            token_path: "/v1/oauth/token",
            revoke: None,
            api_base: "https://api.notion.com",
            scopes: &[],
            scope_separator: " ",
            extra_authorize_params: &[("owner", "user")],
            token_auth: TokenAuthStyle::BasicAuthJson,
            supports_refresh: false,
            feed: FeedSpec {
                method: FeedMethod::Post,
                path: "/v1/search",
                static_query: &[],
                headers: &[("Notion-Version", "2022-06-28")],
                since_param: None,
                items_pointer: "/results",
                id_pointer: "/id",
                title_pointer: "/properties/title/title/0/plain_text",
                url_pointer: "/url",
                time_pointer: "/last_edited_time",
                kind: "page",
            },
        },
        ProviderKind::GoogleCalendar => Catalogue {
            oauth_base: "https://accounts.google.com",
            authorize_path: "/o/oauth2/v2/auth",
            token_base: "https://oauth2.googleapis.com",
            token_path: "/token",
            revoke: Some(("https://oauth2.googleapis.com", "/revoke", RevokeStyle::FormToken)),
            api_base: "https://www.googleapis.com",
            scopes: &["https://www.googleapis.com/auth/calendar.readonly"],
            scope_separator: " ",
            extra_authorize_params: &[("access_type", "offline"), ("prompt", "consent")],
            token_auth: TokenAuthStyle::ClientSecretPost,
            supports_refresh: true,
            feed: FeedSpec {
                method: FeedMethod::Get,
                path: "/calendar/v3/calendars/primary/events",
                static_query: &[("singleEvents", "true"), ("maxResults", "250")],
                headers: &[],
                since_param: Some("updatedMin"),
                items_pointer: "/items",
                id_pointer: "/id",
                title_pointer: "/summary",
                url_pointer: "/htmlLink",
                time_pointer: "/updated",
                kind: "event",
            },
        },
    }
}

/// Fully resolved provider configuration
#[derive(Debug, Clone)]
pub struct ProviderDefinition {
    pub kind: ProviderKind,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub revoke_endpoint: Option<(Url, RevokeStyle)>,
    pub api_base: Url,
    pub scopes: Vec<String>,
    pub scope_separator: &'static str,
    pub extra_authorize_params: Vec<(&'static str, &'static str)>,
    pub token_auth: TokenAuthStyle,
    pub supports_refresh: bool,
    pub client_id: String,
    pub client_secret: String,
    pub feed: FeedSpec,
}

impl ProviderDefinition {
    pub fn scope_string(&self) -> String {
        self.scopes.join(self.scope_separator)
    }
}

/// Registry of enabled providers
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<ProviderDefinition>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for every provider listed in `enabled_providers`
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for name in &config.enabled_providers {
            let kind: ProviderKind = name.parse().map_err(|_| RegistryError::UnknownProvider {
                name: name.clone(),
            })?;
            let client = config.providers.get(name).cloned().unwrap_or_default();

            let client_id = client
                .client_id
                .ok_or(RegistryError::MissingClientId { provider: kind })?;
            let client_secret = client
                .client_secret
                .ok_or(RegistryError::MissingClientSecret { provider: kind })?;

            let definition = build_definition(
                kind,
                client_id,
                client_secret,
                client.oauth_base.as_deref(),
                client.api_base.as_deref(),
            )?;
            registry.register(definition);
        }

        Ok(registry)
    }

    pub fn register(&mut self, definition: ProviderDefinition) {
        tracing::info!(provider = %definition.kind, "Registered provider");
        self.providers.insert(definition.kind, Arc::new(definition));
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<ProviderDefinition>, SyncCoreError> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            SyncCoreError::Validation(format!("provider '{}' is not enabled", kind))
        })
    }

    /// Parse a path segment and return the enabled definition
    pub fn lookup(&self, name: &str) -> Result<Arc<ProviderDefinition>, SyncCoreError> {
        self.get(name.parse()?)
    }

    pub fn enabled(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.providers.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Resolve endpoints for `kind`, replacing the catalogue hosts with overrides.
///
/// An OAuth base override applies to the authorize, token and revoke hosts
/// alike; an API base override applies to the activity feed and GitHub's
/// grant revocation.
pub fn build_definition(
    kind: ProviderKind,
    client_id: String,
    client_secret: String,
    oauth_base: Option<&str>,
    api_base: Option<&str>,
) -> Result<ProviderDefinition, RegistryError> {
    let cat = catalogue(kind);
    let parse = |base: &str, path: &str| -> Result<Url, RegistryError> {
        let raw = format!("{}{}", base.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|source| RegistryError::InvalidEndpoint {
            provider: kind,
            url: raw,
            source,
        })
    };

    let api_base_str = api_base.unwrap_or(cat.api_base);
    let revoke_endpoint = match cat.revoke {
        Some((_, path, RevokeStyle::GrantDelete)) => Some((
            parse(api_base_str, &format!("{}/{}/grant", path, client_id))?,
            RevokeStyle::GrantDelete,
        )),
        Some((base, path, style)) => Some((parse(oauth_base.unwrap_or(base), path)?, style)),
        None => None,
    };

    Ok(ProviderDefinition {
        kind,
        authorization_endpoint: parse(oauth_base.unwrap_or(cat.oauth_base), cat.authorize_path)?,
        token_endpoint: parse(oauth_base.unwrap_or(cat.token_base), cat.token_path)?,
        revoke_endpoint,
        api_base: parse(api_base_str, "")?,
        scopes: cat.scopes.iter().map(|s| s.to_string()).collect(),
        scope_separator: cat.scope_separator,
        extra_authorize_params: cat.extra_authorize_params.to_vec(),
        token_auth: cat.token_auth,
        supports_refresh: cat.supports_refresh,
        client_id,
        client_secret,
        feed: cat.feed,
    })
}
