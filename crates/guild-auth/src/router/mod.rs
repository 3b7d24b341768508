mod audit;
mod auth;

use utoipa_axum::router::OpenApiRouter;

use crate::service::GuildAuthService;

pub const PATH_PREFIX: &str = "/api";
pub const API_VERSION_1: &str = "v1";
pub const SERVICE_ROUTE_KEY: &str = "auth";

/// Carries the state token issued at authorize time back to the callback.
pub const OAUTH_STATE_COOKIE_NAME: &str = "guildgate_oauth_state";

pub fn create_router() -> OpenApiRouter<GuildAuthService> {
    OpenApiRouter::new()
        .merge(auth::create_auth_routes())
        .merge(audit::create_audit_routes())
}
