use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use utoipa::ToSchema;

pub mod sqlite;

/// A wiki account managed by this service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Account {
    pub id: WrappedUuidV4,
    pub name: String,
    pub email: Option<String>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub name: String,
    pub email: Option<String>,
}

/// Link between an upstream identity and a local account. `external_id` is
/// the permanent key; `provider_username` is a display-only snapshot
/// refreshed on every login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdentityLink {
    pub external_id: String,
    pub account_id: WrappedUuidV4,
    pub provider_username: String,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

/// Anti-forgery token persisted between the authorize redirect and the
/// provider callback. Single use.
#[derive(Debug, Clone)]
pub struct OAuthStateRow {
    pub state: String,
    pub created_at: WrappedChronoDateTime,
    pub expires_at: WrappedChronoDateTime,
}

/// Verified identity parked while the user picks an account name.
#[derive(Debug, Clone)]
pub struct PendingSignup {
    pub stash_token: String,
    pub identity_json: String,
    pub roles_json: String,
    pub created_at: WrappedChronoDateTime,
    pub expires_at: WrappedChronoDateTime,
}

#[allow(async_fn_in_trait)]
pub trait AuthRepositoryLike {
    // oauth state
    async fn insert_oauth_state(
        &self,
        state: &str,
        ttl_seconds: i64,
    ) -> Result<(), CommonError>;
    /// Removes and returns the row in one step so a token can never be
    /// presented twice.
    async fn take_oauth_state(&self, state: &str)
        -> Result<Option<OAuthStateRow>, CommonError>;
    async fn delete_expired_oauth_states(&self) -> Result<u64, CommonError>;

    // accounts and identity links
    async fn create_account(&self, params: CreateAccount) -> Result<Account, CommonError>;
    async fn get_account_by_id(&self, id: &WrappedUuidV4) -> Result<Account, CommonError>;
    async fn get_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Account>, CommonError>;
    async fn list_accounts(&self) -> Result<Vec<Account>, CommonError>;

    async fn create_identity_link(
        &self,
        external_id: &str,
        account_id: &WrappedUuidV4,
        provider_username: &str,
    ) -> Result<IdentityLink, CommonError>;
    async fn get_identity_link(
        &self,
        external_id: &str,
    ) -> Result<Option<IdentityLink>, CommonError>;
    async fn get_identity_link_by_account(
        &self,
        account_id: &WrappedUuidV4,
    ) -> Result<Option<IdentityLink>, CommonError>;
    async fn update_provider_username(
        &self,
        external_id: &str,
        provider_username: &str,
    ) -> Result<(), CommonError>;

    // group memberships
    async fn get_groups(
        &self,
        account_id: &WrappedUuidV4,
    ) -> Result<Vec<String>, CommonError>;
    async fn add_to_group(
        &self,
        account_id: &WrappedUuidV4,
        group_name: &str,
    ) -> Result<(), CommonError>;
    async fn remove_from_group(
        &self,
        account_id: &WrappedUuidV4,
        group_name: &str,
    ) -> Result<(), CommonError>;

    // pending signups
    async fn insert_pending_signup(
        &self,
        stash_token: &str,
        identity_json: &str,
        roles_json: &str,
        ttl_seconds: i64,
    ) -> Result<(), CommonError>;
    /// The stash outlives failed name submissions, so reads do not consume
    /// it; callers delete explicitly once the signup completes.
    async fn get_pending_signup(
        &self,
        stash_token: &str,
    ) -> Result<Option<PendingSignup>, CommonError>;
    async fn delete_pending_signup(&self, stash_token: &str) -> Result<(), CommonError>;
}
