use std::collections::BTreeMap;

use anyhow::Context;
use chrono::Duration;
use shared::error::CommonError;
use shared::primitives::{
    Migrations, SqlMigrationLoader, WrappedChronoDateTime, WrappedUuidV4,
};

use crate::repository::{
    Account, AuthRepositoryLike, CreateAccount, IdentityLink, OAuthStateRow, PendingSignup,
};

#[derive(Clone)]
pub struct Repository {
    conn: shared::libsql::Connection,
}

impl Repository {
    pub fn new(conn: shared::libsql::Connection) -> Self {
        Self { conn }
    }
}

impl SqlMigrationLoader for Repository {
    fn load_sql_migrations() -> Migrations {
        BTreeMap::from([
            (
                "0001_init.up.sql",
                include_str!("../../migrations/0001_init.up.sql"),
            ),
            (
                "0001_init.down.sql",
                include_str!("../../migrations/0001_init.down.sql"),
            ),
        ])
    }
}

fn repo_err(e: anyhow::Error) -> CommonError {
    CommonError::Repository {
        msg: e.to_string(),
        source: Some(e),
    }
}

fn account_from_row(row: &libsql::Row) -> Result<Account, libsql::Error> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl AuthRepositoryLike for Repository {
    async fn insert_oauth_state(&self, state: &str, ttl_seconds: i64) -> Result<(), CommonError> {
        let now = WrappedChronoDateTime::now();
        let expires_at =
            WrappedChronoDateTime::from(*now.get_inner() + Duration::seconds(ttl_seconds));

        self.conn
            .execute(
                "INSERT INTO oauth_state (state, created_at, expires_at) VALUES (?, ?, ?)",
                libsql::params![state, now, expires_at],
            )
            .await
            .context("Failed to insert oauth state")
            .map_err(repo_err)?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
    ) -> Result<Option<OAuthStateRow>, CommonError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, created_at, expires_at FROM oauth_state WHERE state = ?")
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![state]).await;

        let row = match res {
            Ok(row) => OAuthStateRow {
                state: row.get(0)?,
                created_at: row.get(1)?,
                expires_at: row.get(2)?,
            },
            Err(libsql::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Delete before returning so the token is spent even when the caller
        // later rejects it.
        self.conn
            .execute(
                "DELETE FROM oauth_state WHERE state = ?",
                libsql::params![state],
            )
            .await
            .context("Failed to delete oauth state")
            .map_err(repo_err)?;

        Ok(Some(row))
    }

    async fn delete_expired_oauth_states(&self) -> Result<u64, CommonError> {
        let now = WrappedChronoDateTime::now();
        let deleted = self
            .conn
            .execute(
                "DELETE FROM oauth_state WHERE expires_at < ?",
                libsql::params![now],
            )
            .await
            .context("Failed to prune oauth states")
            .map_err(repo_err)?;
        Ok(deleted)
    }

    async fn create_account(&self, params: CreateAccount) -> Result<Account, CommonError> {
        let id = WrappedUuidV4::new();
        let now = WrappedChronoDateTime::now();

        self.conn
            .execute(
                "INSERT INTO account (id, name, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    id.clone(),
                    params.name.clone(),
                    params.email.clone(),
                    now.clone(),
                    now.clone()
                ],
            )
            .await
            .context("Failed to create account")
            .map_err(repo_err)?;

        Ok(Account {
            id,
            name: params.name,
            email: params.email,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn get_account_by_id(&self, id: &WrappedUuidV4) -> Result<Account, CommonError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email, created_at, updated_at FROM account WHERE id = ?")
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![id.clone()]).await;

        match res {
            Ok(row) => Ok(account_from_row(&row)?),
            Err(libsql::Error::QueryReturnedNoRows) => Err(CommonError::NotFound {
                msg: "Account not found".to_string(),
                lookup_id: id.to_string(),
                source: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>, CommonError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email, created_at, updated_at FROM account WHERE name = ?")
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![name]).await;

        match res {
            Ok(row) => Ok(Some(account_from_row(&row)?)),
            Err(libsql::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, email, created_at, updated_at FROM account ORDER BY name",
                (),
            )
            .await?;

        let mut accounts = Vec::new();
        while let Some(row) = rows.next().await? {
            accounts.push(account_from_row(&row)?);
        }
        Ok(accounts)
    }

    async fn create_identity_link(
        &self,
        external_id: &str,
        account_id: &WrappedUuidV4,
        provider_username: &str,
    ) -> Result<IdentityLink, CommonError> {
        let now = WrappedChronoDateTime::now();

        self.conn
            .execute(
                "INSERT INTO identity_link (external_id, account_id, provider_username, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    external_id,
                    account_id.clone(),
                    provider_username,
                    now.clone(),
                    now.clone()
                ],
            )
            .await
            .context("Failed to create identity link")
            .map_err(repo_err)?;

        Ok(IdentityLink {
            external_id: external_id.to_string(),
            account_id: account_id.clone(),
            provider_username: provider_username.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn get_identity_link(
        &self,
        external_id: &str,
    ) -> Result<Option<IdentityLink>, CommonError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT external_id, account_id, provider_username, created_at, updated_at FROM identity_link WHERE external_id = ?",
            )
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![external_id]).await;

        match res {
            Ok(row) => Ok(Some(IdentityLink {
                external_id: row.get(0)?,
                account_id: row.get(1)?,
                provider_username: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })),
            Err(libsql::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_identity_link_by_account(
        &self,
        account_id: &WrappedUuidV4,
    ) -> Result<Option<IdentityLink>, CommonError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT external_id, account_id, provider_username, created_at, updated_at FROM identity_link WHERE account_id = ?",
            )
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![account_id.clone()]).await;

        match res {
            Ok(row) => Ok(Some(IdentityLink {
                external_id: row.get(0)?,
                account_id: row.get(1)?,
                provider_username: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })),
            Err(libsql::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_provider_username(
        &self,
        external_id: &str,
        provider_username: &str,
    ) -> Result<(), CommonError> {
        let now = WrappedChronoDateTime::now();
        self.conn
            .execute(
                "UPDATE identity_link SET provider_username = ?, updated_at = ? WHERE external_id = ?",
                libsql::params![provider_username, now, external_id],
            )
            .await
            .context("Failed to update provider username")
            .map_err(repo_err)?;
        Ok(())
    }

    async fn get_groups(&self, account_id: &WrappedUuidV4) -> Result<Vec<String>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT group_name FROM group_membership WHERE account_id = ? ORDER BY group_name",
                libsql::params![account_id.clone()],
            )
            .await?;

        let mut groups = Vec::new();
        while let Some(row) = rows.next().await? {
            groups.push(row.get(0)?);
        }
        Ok(groups)
    }

    async fn add_to_group(
        &self,
        account_id: &WrappedUuidV4,
        group_name: &str,
    ) -> Result<(), CommonError> {
        let now = WrappedChronoDateTime::now();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO group_membership (account_id, group_name, created_at) VALUES (?, ?, ?)",
                libsql::params![account_id.clone(), group_name, now],
            )
            .await
            .context("Failed to add group membership")
            .map_err(repo_err)?;
        Ok(())
    }

    async fn remove_from_group(
        &self,
        account_id: &WrappedUuidV4,
        group_name: &str,
    ) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM group_membership WHERE account_id = ? AND group_name = ?",
                libsql::params![account_id.clone(), group_name],
            )
            .await
            .context("Failed to remove group membership")
            .map_err(repo_err)?;
        Ok(())
    }

    async fn insert_pending_signup(
        &self,
        stash_token: &str,
        identity_json: &str,
        roles_json: &str,
        ttl_seconds: i64,
    ) -> Result<(), CommonError> {
        let now = WrappedChronoDateTime::now();
        let expires_at =
            WrappedChronoDateTime::from(*now.get_inner() + Duration::seconds(ttl_seconds));

        self.conn
            .execute(
                "INSERT INTO pending_signup (stash_token, identity_json, roles_json, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![stash_token, identity_json, roles_json, now, expires_at],
            )
            .await
            .context("Failed to insert pending signup")
            .map_err(repo_err)?;
        Ok(())
    }

    async fn get_pending_signup(
        &self,
        stash_token: &str,
    ) -> Result<Option<PendingSignup>, CommonError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT stash_token, identity_json, roles_json, created_at, expires_at FROM pending_signup WHERE stash_token = ?",
            )
            .await
            .map_err(CommonError::from)?;
        let res = stmt.query_row(libsql::params![stash_token]).await;

        match res {
            Ok(row) => Ok(Some(PendingSignup {
                stash_token: row.get(0)?,
                identity_json: row.get(1)?,
                roles_json: row.get(2)?,
                created_at: row.get(3)?,
                expires_at: row.get(4)?,
            })),
            Err(libsql::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pending_signup(&self, stash_token: &str) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM pending_signup WHERE stash_token = ?",
                libsql::params![stash_token],
            )
            .await
            .context("Failed to delete pending signup")
            .map_err(repo_err)?;
        Ok(())
    }
}
