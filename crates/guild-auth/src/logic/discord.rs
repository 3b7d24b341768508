//! Thin HTTP client for the Discord OAuth2 and guild endpoints.
//!
//! Every operation is a single call with no retry; failures become typed
//! [`DiscordApiError`] values and the caller decides what the user sees.
//! Responses are decoded into explicit structs so a schema mismatch fails
//! closed instead of producing null-shaped values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::settings::AuthSettings;

const API_BASE: &str = "https://discord.com/api";
const OAUTH_SCOPE: &str = "identify guilds.members.read";

/// Upstream calls fail with a transport error rather than hanging past this.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Immutable identity snapshot fetched once per login attempt.
///
/// `id` is the stable foreign key; `username`/`global_name` are unstable and
/// only used for naming suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The caller's roles within the guild at the moment of the check.
/// Never cached; re-fetched on every authentication and every audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Bearer token obtained from the authorization-code exchange.
#[derive(Debug, Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GuildRole {
    id: String,
    name: String,
}

#[derive(Debug, Error)]
pub enum DiscordApiError {
    #[error("transport failure calling {endpoint}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    UpstreamStatus { endpoint: &'static str, status: u16 },
    #[error("could not decode {endpoint} response")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("not a member of the configured guild")]
    NotMember,
    #[error("bot credential is not configured")]
    MissingBotCredential,
}

impl DiscordApiError {
    /// True when the failure is a transport-level problem rather than a
    /// definitive upstream answer. Only interesting for logging; callers
    /// collapse both into the same user-visible outcome.
    pub fn is_transport(&self) -> bool {
        matches!(self, DiscordApiError::Transport { .. })
    }
}

/// Seam for the upstream provider; the flow controller and the audit are
/// generic over this so tests can script upstream behavior.
#[allow(async_fn_in_trait)]
pub trait DiscordApiLike {
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, DiscordApiError>;

    async fn fetch_identity(
        &self,
        token: &AccessToken,
    ) -> Result<ExternalIdentity, DiscordApiError>;

    async fn fetch_membership(
        &self,
        token: &AccessToken,
    ) -> Result<MembershipRecord, DiscordApiError>;

    async fn fetch_membership_as_bot(
        &self,
        external_id: &str,
    ) -> Result<MembershipRecord, DiscordApiError>;

    async fn fetch_guild_roles(&self) -> Result<BTreeMap<String, String>, DiscordApiError>;
}

/// Real client speaking to the Discord API over HTTPS.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    guild_id: String,
    bot_token: Option<String>,
}

impl DiscordClient {
    pub fn new(settings: &AuthSettings) -> Result<Self, DiscordApiError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DiscordApiError::Transport {
                endpoint: "client",
                source: e,
            })?;

        Ok(Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            guild_id: settings.guild_id.clone(),
            bot_token: settings.bot_token.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: String,
        auth_header: String,
        member_endpoint: bool,
    ) -> Result<T, DiscordApiError> {
        let response = self
            .http
            .get(&url)
            .header(http::header::AUTHORIZATION, auth_header)
            .send()
            .await
            .map_err(|e| DiscordApiError::Transport { endpoint, source: e })?;

        let status = response.status();
        if !status.is_success() {
            // On the membership endpoints a 403/404 is Discord's way of
            // saying "not in this guild".
            if member_endpoint
                && (status == reqwest::StatusCode::NOT_FOUND
                    || status == reqwest::StatusCode::FORBIDDEN)
            {
                return Err(DiscordApiError::NotMember);
            }
            return Err(DiscordApiError::UpstreamStatus {
                endpoint,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DiscordApiError::Decode { endpoint, source: e })
    }

    fn bot_auth(&self) -> Result<String, DiscordApiError> {
        match &self.bot_token {
            Some(token) => Ok(format!("Bot {token}")),
            None => Err(DiscordApiError::MissingBotCredential),
        }
    }
}

impl DiscordApiLike for DiscordClient {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{API_BASE}/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPE),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, DiscordApiError> {
        let endpoint = "oauth2/token";
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(format!("{API_BASE}/oauth2/token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| DiscordApiError::Transport { endpoint, source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscordApiError::UpstreamStatus {
                endpoint,
                status: status.as_u16(),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DiscordApiError::Decode { endpoint, source: e })?;

        Ok(AccessToken::new(token.access_token))
    }

    async fn fetch_identity(
        &self,
        token: &AccessToken,
    ) -> Result<ExternalIdentity, DiscordApiError> {
        self.get_json(
            "users/@me",
            format!("{API_BASE}/users/@me"),
            format!("Bearer {}", token.secret()),
            false,
        )
        .await
    }

    async fn fetch_membership(
        &self,
        token: &AccessToken,
    ) -> Result<MembershipRecord, DiscordApiError> {
        self.get_json(
            "users/@me/guilds/member",
            format!("{API_BASE}/users/@me/guilds/{}/member", self.guild_id),
            format!("Bearer {}", token.secret()),
            true,
        )
        .await
    }

    async fn fetch_membership_as_bot(
        &self,
        external_id: &str,
    ) -> Result<MembershipRecord, DiscordApiError> {
        let auth = self.bot_auth()?;
        self.get_json(
            "guilds/members",
            format!("{API_BASE}/v10/guilds/{}/members/{external_id}", self.guild_id),
            auth,
            true,
        )
        .await
    }

    async fn fetch_guild_roles(&self) -> Result<BTreeMap<String, String>, DiscordApiError> {
        let auth = self.bot_auth()?;
        let roles: Vec<GuildRole> = self
            .get_json(
                "guilds/roles",
                format!("{API_BASE}/v10/guilds/{}/roles", self.guild_id),
                auth,
                false,
            )
            .await?;

        Ok(roles.into_iter().map(|role| (role.id, role.name)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::settings::AuthSettings;
    use serde_json::json;

    fn settings() -> AuthSettings {
        AuthSettings::from_json(json!({
            "client_id": "cid with spaces",
            "client_secret": "secret",
            "redirect_uri": "https://wiki.example/auth/callback",
            "guild_id": "100200300",
        }))
        .unwrap()
    }

    #[test]
    fn test_authorize_url_contains_encoded_parameters() {
        let client = DiscordClient::new(&settings()).unwrap();
        let url = client.authorize_url("state-token");

        assert!(url.starts_with("https://discord.com/api/oauth2/authorize?"));
        assert!(url.contains("client_id=cid%20with%20spaces"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fwiki.example%2Fauth%2Fcallback"));
        assert!(url.contains("scope=identify%20guilds.members.read"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_bot_calls_require_credential() {
        let client = DiscordClient::new(&settings()).unwrap();
        assert!(matches!(
            client.bot_auth(),
            Err(DiscordApiError::MissingBotCredential)
        ));
    }

    #[test]
    fn test_membership_roles_decode_as_strings() {
        // Large role ids must survive decoding untouched
        let record: MembershipRecord = serde_json::from_value(json!({
            "roles": ["987654321098765432101", "111"],
            "nick": "ignored",
        }))
        .unwrap();
        assert_eq!(record.roles[0], "987654321098765432101");
    }

    #[test]
    fn test_identity_decode_tolerates_missing_optional_fields() {
        let identity: ExternalIdentity =
            serde_json::from_value(json!({"id": "42", "username": "bob"})).unwrap();
        assert_eq!(identity.id, "42");
        assert!(identity.global_name.is_none());
        assert!(identity.email.is_none());
    }
}
