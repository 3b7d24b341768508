//! Configuration surface consumed by the authentication flow.
//!
//! Settings are deserialized from JSON (file or injected value) and validated
//! once at load time. A malformed role mapping fails startup instead of
//! silently disabling group sync; an *absent* mapping is the valid
//! "sync disabled by configuration" state.

use serde::Deserialize;
use shared::error::CommonError;

use crate::logic::role_mapping::{RawRoleGroupMapping, RoleGroupMapping};

const DEFAULT_STATE_TTL_SECONDS: u64 = 600;
const DEFAULT_AUDIT_CONCURRENCY: usize = 4;

/// Group synchronization policy.
///
/// `always` re-syncs on every login, `disabled` never syncs automatically,
/// and any other configured value means sync runs only once at account
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Always,
    Disabled,
    OnCreate,
}

impl SyncMode {
    fn from_config_value(value: &str) -> Self {
        match value {
            "always" => SyncMode::Always,
            "disabled" => SyncMode::Disabled,
            _ => SyncMode::OnCreate,
        }
    }
}

impl<'de> Deserialize<'de> for SyncMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SyncMode::from_config_value(&raw))
    }
}

fn default_sync_mode() -> SyncMode {
    SyncMode::OnCreate
}

fn default_state_ttl() -> u64 {
    DEFAULT_STATE_TTL_SECONDS
}

fn default_audit_concurrency() -> usize {
    DEFAULT_AUDIT_CONCURRENCY
}

fn default_auto_create() -> bool {
    true
}

/// Raw settings as they appear in configuration, before validation.
#[derive(Debug, Deserialize)]
pub struct RawAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Absolute URL the provider redirects back to after authorization.
    pub redirect_uri: String,
    /// The Discord guild whose membership gates access.
    pub guild_id: String,
    /// Privileged credential for the bulk membership audit. Optional.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Role ids that grant access. Empty means membership alone suffices.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default = "default_auto_create")]
    pub auto_create: bool,
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,
    /// Role -> group mapping, in either supported encoding.
    #[serde(default)]
    pub role_mapping: Option<RawRoleGroupMapping>,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    #[serde(default = "default_audit_concurrency")]
    pub audit_concurrency: usize,
}

/// Validated settings handed to the flow controller and the Discord client.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub guild_id: String,
    pub bot_token: Option<String>,
    pub allowed_roles: Vec<String>,
    pub auto_create: bool,
    pub sync_mode: SyncMode,
    pub role_mapping: RoleGroupMapping,
    pub state_ttl_seconds: u64,
    pub audit_concurrency: usize,
}

impl TryFrom<RawAuthSettings> for AuthSettings {
    type Error = CommonError;

    fn try_from(raw: RawAuthSettings) -> Result<Self, Self::Error> {
        let role_mapping = match raw.role_mapping {
            Some(ref mapping) => RoleGroupMapping::normalize(mapping)?,
            None => RoleGroupMapping::default(),
        };

        if raw.client_id.is_empty() || raw.client_secret.is_empty() {
            return Err(CommonError::InvalidRequest {
                msg: "client_id and client_secret must be configured".to_string(),
                source: None,
            });
        }
        if raw.guild_id.is_empty() {
            return Err(CommonError::InvalidRequest {
                msg: "guild_id must be configured".to_string(),
                source: None,
            });
        }

        Ok(AuthSettings {
            client_id: raw.client_id,
            client_secret: raw.client_secret,
            redirect_uri: raw.redirect_uri,
            guild_id: raw.guild_id,
            bot_token: raw.bot_token,
            allowed_roles: raw.allowed_roles,
            auto_create: raw.auto_create,
            sync_mode: raw.sync_mode,
            role_mapping,
            state_ttl_seconds: raw.state_ttl_seconds,
            audit_concurrency: raw.audit_concurrency.max(1),
        })
    }
}

impl AuthSettings {
    /// Parse and validate settings from a JSON document.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CommonError> {
        let raw: RawAuthSettings = serde_json::from_value(value)?;
        raw.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_settings(extra: serde_json::Value) -> serde_json::Value {
        let mut base = json!({
            "client_id": "cid",
            "client_secret": "secret",
            "redirect_uri": "https://wiki.example/auth/callback",
            "guild_id": "100200300",
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        base
    }

    #[test]
    fn test_sync_mode_parsing() {
        let settings =
            AuthSettings::from_json(minimal_settings(json!({"sync_mode": "always"}))).unwrap();
        assert_eq!(settings.sync_mode, SyncMode::Always);

        let settings =
            AuthSettings::from_json(minimal_settings(json!({"sync_mode": "disabled"}))).unwrap();
        assert_eq!(settings.sync_mode, SyncMode::Disabled);

        // Anything else is treated as sync-on-create-only
        let settings =
            AuthSettings::from_json(minimal_settings(json!({"sync_mode": "manual"}))).unwrap();
        assert_eq!(settings.sync_mode, SyncMode::OnCreate);
    }

    #[test]
    fn test_missing_mapping_is_sync_disabled_not_an_error() {
        let settings = AuthSettings::from_json(minimal_settings(json!({}))).unwrap();
        assert!(settings.role_mapping.is_empty());
    }

    #[test]
    fn test_malformed_mapping_fails_fast() {
        let result = AuthSettings::from_json(minimal_settings(json!({
            "role_mapping": {"": "editor"},
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_client_credentials_rejected() {
        let result = AuthSettings::from_json(json!({
            "client_id": "",
            "client_secret": "",
            "redirect_uri": "https://wiki.example/auth/callback",
            "guild_id": "100200300",
        }));
        assert!(result.is_err());
    }
}
