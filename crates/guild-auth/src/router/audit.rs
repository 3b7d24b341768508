use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use shared::error::CommonError;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::audit::{AuditReport, run_membership_audit};
use crate::service::GuildAuthService;

use super::{API_VERSION_1, PATH_PREFIX, SERVICE_ROUTE_KEY};

pub fn create_audit_routes() -> OpenApiRouter<GuildAuthService> {
    OpenApiRouter::new().routes(routes!(route_membership_audit))
}

/// Re-check every linked account against the guild
#[utoipa::path(
    get,
    path = format!("{}/{}/{}/admin/membership-audit", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY],
    responses(
        (status = 200, description = "Audit report", body = AuditReport),
        (status = 400, description = "Bot token not configured", body = CommonError),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Membership audit",
    description = "Read-only report of guild membership and group drift for every linked account",
)]
async fn route_membership_audit(State(service): State<GuildAuthService>) -> Response {
    match run_membership_audit(
        service.repository.as_ref(),
        service.discord.as_ref(),
        &service.settings,
    )
    .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}
