//! The authorization-code flow: state issuance, callback handling and the
//! deferred name-choice step for first-time accounts.
//!
//! Every rejection a user can cause maps to an [`AuthFailure`] inside a
//! normal `Ok(AuthOutcome::Fail(..))`; `Err(CommonError)` is reserved for
//! infrastructure problems (database, serialization).

use rand::RngCore;
use serde::Serialize;
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::logic::discord::{DiscordApiError, DiscordApiLike, ExternalIdentity};
use crate::logic::group_sync::sync_account_groups;
use crate::logic::settings::{AuthSettings, SyncMode};
use crate::logic::username;
use crate::repository::{AuthRepositoryLike, CreateAccount};

/// Why an authentication attempt was refused. These are user-causable
/// outcomes, not infrastructure errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// Missing, expired, mismatched or already-spent anti-forgery state.
    InvalidState,
    /// Could not reach the provider at all.
    UpstreamUnavailable,
    /// The provider refused the code exchange, or sent no code.
    TokenExchangeFailed,
    /// Authenticated but the identity endpoint failed.
    UserInfoFailed,
    /// Not a member of the gating guild, or membership could not be proven.
    NotMember,
    /// A member, but holds none of the allow-listed roles.
    RoleNotAllowed,
    /// First login while account auto-creation is switched off.
    AccountCreationDisabled,
    /// The submitted account name failed validation.
    InvalidUsername,
    /// The submitted account name is already taken.
    UsernameExists,
}

/// Result of a completed callback or name-choice step. Session issuance is
/// the HTTP layer's concern; this layer only decides.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    Pass {
        account_id: WrappedUuidV4,
        account_name: String,
        groups: Vec<String>,
    },
    PendingNameChoice {
        candidate_name: String,
        stash_token: String,
    },
    Fail {
        reason: AuthFailure,
    },
}

/// Query parameters of the provider redirect, plus the state token this
/// browser was issued at authorize time (carried in a cookie).
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub session_state: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub redirect_url: String,
    pub state: String,
}

/// 32 hex chars of OS randomness, used for both state and stash tokens.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct AuthFlowController<R, D> {
    repository: R,
    discord: D,
    settings: AuthSettings,
}

impl<R: AuthRepositoryLike, D: DiscordApiLike> AuthFlowController<R, D> {
    pub fn new(repository: R, discord: D, settings: AuthSettings) -> Self {
        Self {
            repository,
            discord,
            settings,
        }
    }

    pub async fn start_authorization(&self) -> Result<AuthorizationStart, CommonError> {
        let state = generate_token();
        self.repository
            .insert_oauth_state(&state, self.settings.state_ttl_seconds as i64)
            .await?;

        // Opportunistic cleanup; stale rows only waste space otherwise.
        self.repository.delete_expired_oauth_states().await?;

        Ok(AuthorizationStart {
            redirect_url: self.discord.authorize_url(&state),
            state,
        })
    }

    pub async fn handle_callback(
        &self,
        params: CallbackParams,
    ) -> Result<AuthOutcome, CommonError> {
        // Spend the state row before anything else so a token is consumed
        // even when the rest of the callback is rejected.
        let session_state = params
            .session_state
            .as_deref()
            .or(params.state.as_deref());
        let Some(session_state) = session_state else {
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        };
        let Some(row) = self.repository.take_oauth_state(session_state).await? else {
            debug!("callback with unknown or already-spent state");
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        };
        if row.expires_at.get_inner() < WrappedChronoDateTime::now().get_inner() {
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        }
        if params.state.as_deref() != Some(row.state.as_str()) {
            warn!("callback state does not match the state issued to this session");
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        }

        if let Some(error) = &params.error {
            info!(error, "provider reported an authorization error");
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::TokenExchangeFailed,
            });
        }
        let Some(code) = params.code.as_deref() else {
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::TokenExchangeFailed,
            });
        };

        let token = match self.discord.exchange_code(code).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "code exchange failed");
                let reason = if e.is_transport() {
                    AuthFailure::UpstreamUnavailable
                } else {
                    AuthFailure::TokenExchangeFailed
                };
                return Ok(AuthOutcome::Fail { reason });
            }
        };

        let identity = match self.discord.fetch_identity(&token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "identity fetch failed");
                let reason = if e.is_transport() {
                    AuthFailure::UpstreamUnavailable
                } else {
                    AuthFailure::UserInfoFailed
                };
                return Ok(AuthOutcome::Fail { reason });
            }
        };

        // A transport failure and a definitive "not in guild" look the same
        // to the user; access cannot be proven either way. Logs keep the
        // distinction.
        let membership = match self.discord.fetch_membership(&token).await {
            Ok(membership) => membership,
            Err(DiscordApiError::NotMember) => {
                info!(external_id = %identity.id, "not a guild member");
                return Ok(AuthOutcome::Fail {
                    reason: AuthFailure::NotMember,
                });
            }
            Err(e) => {
                warn!(error = %e, "membership check failed");
                return Ok(AuthOutcome::Fail {
                    reason: AuthFailure::NotMember,
                });
            }
        };

        if !self.roles_allowed(&membership.roles) {
            info!(external_id = %identity.id, "member without an allow-listed role");
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::RoleNotAllowed,
            });
        }

        if let Some(link) = self.repository.get_identity_link(&identity.id).await? {
            self.repository
                .update_provider_username(&identity.id, &identity.username)
                .await?;

            if self.settings.sync_mode == SyncMode::Always {
                sync_account_groups(
                    &self.repository,
                    &self.settings.role_mapping,
                    &link.account_id,
                    &membership.roles,
                )
                .await?;
            }

            let account = self.repository.get_account_by_id(&link.account_id).await?;
            let groups = self.repository.get_groups(&link.account_id).await?;
            info!(account = %account.name, "authenticated existing account");
            return Ok(AuthOutcome::Pass {
                account_id: account.id,
                account_name: account.name,
                groups,
            });
        }

        if !self.settings.auto_create {
            info!(external_id = %identity.id, "unlinked identity while auto-create is off");
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::AccountCreationDisabled,
            });
        }

        let candidate_name = username::canonicalize(&identity);
        let stash_token = generate_token();
        self.repository
            .insert_pending_signup(
                &stash_token,
                &serde_json::to_string(&identity)?,
                &serde_json::to_string(&membership.roles)?,
                self.settings.state_ttl_seconds as i64,
            )
            .await?;

        Ok(AuthOutcome::PendingNameChoice {
            candidate_name,
            stash_token,
        })
    }

    pub async fn complete_name_choice(
        &self,
        stash_token: &str,
        submitted_name: &str,
    ) -> Result<AuthOutcome, CommonError> {
        let Some(stash) = self.repository.get_pending_signup(stash_token).await? else {
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        };
        if stash.expires_at.get_inner() < WrappedChronoDateTime::now().get_inner() {
            self.repository.delete_pending_signup(stash_token).await?;
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidState,
            });
        }

        let identity: ExternalIdentity = serde_json::from_str(&stash.identity_json)?;
        let roles: Vec<String> = serde_json::from_str(&stash.roles_json)?;

        let name = username::to_canonical_form(&username::sanitize(submitted_name));
        if username::validate_account_name(&name).is_err() {
            // Stash stays; the user may submit another name.
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::InvalidUsername,
            });
        }
        if self.repository.get_account_by_name(&name).await?.is_some() {
            return Ok(AuthOutcome::Fail {
                reason: AuthFailure::UsernameExists,
            });
        }

        let account = self
            .repository
            .create_account(CreateAccount {
                name,
                email: identity.email.clone(),
            })
            .await?;
        self.repository
            .create_identity_link(&identity.id, &account.id, &identity.username)
            .await?;

        if self.settings.sync_mode != SyncMode::Disabled {
            sync_account_groups(
                &self.repository,
                &self.settings.role_mapping,
                &account.id,
                &roles,
            )
            .await?;
        }

        self.repository.delete_pending_signup(stash_token).await?;

        let groups = self.repository.get_groups(&account.id).await?;
        info!(account = %account.name, external_id = %identity.id, "created account");
        Ok(AuthOutcome::Pass {
            account_id: account.id,
            account_name: account.name,
            groups,
        })
    }

    /// Empty allow-list means guild membership alone grants access.
    fn roles_allowed(&self, roles: &[String]) -> bool {
        self.settings.allowed_roles.is_empty()
            || self
                .settings
                .allowed_roles
                .iter()
                .any(|allowed| roles.iter().any(|role| role == allowed))
    }
}
