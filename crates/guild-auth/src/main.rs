use std::env;
use std::sync::Arc;

use anyhow::Context;
use shared::error::CommonError;
use shared::primitives::SqlMigrationLoader;
use tracing::info;

use guild_auth::logic::discord::DiscordClient;
use guild_auth::logic::settings::AuthSettings;
use guild_auth::repository::sqlite::Repository;
use guild_auth::router::create_router;
use guild_auth::service::{GuildAuthService, GuildAuthServiceParams};

#[tokio::main]
async fn main() -> Result<(), CommonError> {
    shared::logging::configure_logging()?;

    let config_path =
        env::var("GUILDGATE_CONFIG").unwrap_or_else(|_| "guildgate.json".to_string());
    let db_path = env::var("GUILDGATE_DB_PATH").unwrap_or_else(|_| "guildgate.db".to_string());
    let listen_addr =
        env::var("GUILDGATE_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let raw_config = std::fs::read_to_string(&config_path)
        .with_context(|| format!("could not read configuration at {config_path}"))
        .map_err(CommonError::Unknown)?;
    let settings = AuthSettings::from_json(serde_json::from_str(&raw_config)?)?;

    let db = libsql::Builder::new_local(&db_path)
        .build()
        .await
        .map_err(|e| CommonError::SqliteError { source: e })?;
    let conn = shared::libsql::Connection::new(
        db.connect().map_err(|e| CommonError::SqliteError { source: e })?,
    );
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;
    conn.apply_up_migrations(&Repository::load_sql_migrations())
        .await?;
    info!(%db_path, "database ready");

    let discord = DiscordClient::new(&settings).map_err(|e| {
        CommonError::InvalidResponse {
            msg: format!("could not build the upstream client: {e}"),
            source: Some(e.into()),
        }
    })?;

    let service = GuildAuthService::new(GuildAuthServiceParams {
        repository: Arc::new(Repository::new(conn)),
        discord: Arc::new(discord),
        settings,
    });

    let (router, _openapi) = create_router().split_for_parts();
    let router = router.with_state(service);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
