use std::ops::Deref;

use libsql::Rows;
use libsql::params::IntoParams;

use crate::error::CommonError;
use crate::primitives::Migrations;

/// Thin wrapper around a libsql connection that retries statements when the
/// database file is momentarily locked by another writer.
#[derive(Debug, Clone)]
pub struct Connection(pub libsql::Connection);

impl Connection {
    pub fn new(connection: libsql::Connection) -> Self {
        Self(connection)
    }
}

impl Deref for Connection {
    type Target = libsql::Connection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[macro_export]
macro_rules! execute_with_retry {
    ($operation:expr) => {
        execute_with_retry!($operation, 10)
    };
    ($operation:expr, $max_retries:expr) => {{
        async {
            let mut _retries = 0u32;
            let _max_retries: u32 = $max_retries;

            loop {
                match $operation.await {
                    Ok(result) => break Ok(result),
                    Err(err) => {
                        let err_str = err.to_string();
                        if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY")
                        {
                            tracing::warn!("Database is locked, retrying... {:?}", err);
                            if _retries >= _max_retries {
                                break Err(err);
                            }

                            _retries += 1;

                            // Very low delay with exponential backoff
                            let delay_us = 10_000 * (1 << _retries.min(6));
                            tokio::time::sleep(std::time::Duration::from_micros(delay_us)).await;
                        } else {
                            tracing::error!("Error executing with retry: {:?}", err);
                            break Err(err);
                        }
                    }
                }
            }
        }
        .await
    }};
}

impl Connection {
    /// Execute a statement, returning the number of rows changed.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> libsql::Result<u64> {
        tracing::trace!("executing `{}`", sql);
        let params = params.into_params()?;
        execute_with_retry!(self.0.execute(sql, params.clone()), 10)
    }

    /// Execute a batch of statements.
    pub async fn execute_batch(&self, sql: &str) -> libsql::Result<()> {
        tracing::trace!("executing batch `{}`", sql);
        execute_with_retry!(self.0.execute_batch(sql), 10)?;
        Ok(())
    }

    /// Run a query, returning the resulting [`Rows`].
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> libsql::Result<Rows> {
        let mut stmt = self.prepare(sql).await?;
        let params = params.into_params()?;
        execute_with_retry!(stmt.query(params.clone()), 10)
    }

    /// Apply the `.up.sql` entries of a migration set in filename order.
    /// Migrations are written to be re-runnable (`IF NOT EXISTS`), so this
    /// is safe at every startup.
    pub async fn apply_up_migrations(&self, migrations: &Migrations) -> Result<(), CommonError> {
        for (filename, contents) in migrations
            .iter()
            .filter(|(filename, _)| filename.contains(".up."))
        {
            self.execute_batch(contents)
                .await
                .map_err(|e| CommonError::Repository {
                    msg: format!("failed to apply migration {filename}: {e}"),
                    source: Some(e.into()),
                })?;
        }
        Ok(())
    }
}
