use crate::error::CommonError;
use crate::libsql::Connection;
use crate::primitives::Migrations;

/// Create an in-memory sqlite database and apply the given `.up.sql`
/// migrations in filename order. The returned `Database` must be kept alive
/// for as long as the connection is used.
pub async fn setup_in_memory_database(
    migrations: Migrations,
) -> Result<(libsql::Database, Connection), CommonError> {
    let db = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .map_err(|e| CommonError::SqliteError { source: e })?;
    let conn = Connection::new(db.connect().map_err(|e| CommonError::SqliteError { source: e })?);

    // Enable foreign key constraints
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;

    conn.apply_up_migrations(&migrations).await?;

    Ok((db, conn))
}
