use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use shared::error::CommonError;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::auth_flow::{AuthFailure, AuthOutcome, CallbackParams};
use crate::service::GuildAuthService;

use super::{API_VERSION_1, OAUTH_STATE_COOKIE_NAME, PATH_PREFIX, SERVICE_ROUTE_KEY};

pub fn create_auth_routes() -> OpenApiRouter<GuildAuthService> {
    OpenApiRouter::new()
        .routes(routes!(route_start_authorization))
        .routes(routes!(route_oauth_callback))
        .routes(routes!(route_choose_username))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackQuery {
    /// Authorization code from the provider
    #[param(example = "abc123")]
    code: Option<String>,
    /// State parameter for CSRF validation
    #[param(example = "xyz789")]
    state: Option<String>,
    /// Error from the provider (if any)
    #[param(example = "access_denied")]
    error: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChooseUsernameRequest {
    /// Stash token returned by the callback's pending_name_choice outcome
    pub stash_token: String,
    /// Desired account name
    pub username: String,
}

fn failure_status(reason: AuthFailure) -> StatusCode {
    match reason {
        AuthFailure::InvalidState
        | AuthFailure::InvalidUsername
        | AuthFailure::UsernameExists => StatusCode::BAD_REQUEST,
        AuthFailure::NotMember
        | AuthFailure::RoleNotAllowed
        | AuthFailure::AccountCreationDisabled => StatusCode::FORBIDDEN,
        AuthFailure::UpstreamUnavailable
        | AuthFailure::TokenExchangeFailed
        | AuthFailure::UserInfoFailed => StatusCode::BAD_GATEWAY,
    }
}

fn outcome_response(outcome: AuthOutcome) -> Response {
    let status = match &outcome {
        AuthOutcome::Fail { reason } => failure_status(*reason),
        _ => StatusCode::OK,
    };
    (status, Json(outcome)).into_response()
}

/// Start the login flow - redirects to the provider
#[utoipa::path(
    get,
    path = format!("{}/{}/{}/oauth/authorize", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY],
    responses(
        (status = 302, description = "Redirect to the provider's authorization endpoint"),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Start authorization",
    description = "Issues a single-use state token and redirects to the provider's consent screen",
)]
async fn route_start_authorization(
    State(service): State<GuildAuthService>,
    jar: CookieJar,
) -> Response {
    match service.flow().start_authorization().await {
        Ok(start) => {
            let cookie = Cookie::build((OAUTH_STATE_COOKIE_NAME, start.state))
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax)
                .path("/")
                .build();
            (jar.add(cookie), Redirect::temporary(&start.redirect_url)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Callback endpoint - handles the provider response
#[utoipa::path(
    get,
    path = format!("{}/{}/{}/oauth/callback", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY],
    params(OAuthCallbackQuery),
    responses(
        (status = 200, description = "Authentication outcome", body = AuthOutcome),
        (status = 400, description = "Invalid state or rejected request", body = AuthOutcome),
        (status = 403, description = "Access refused", body = AuthOutcome),
        (status = 502, description = "Provider failure", body = AuthOutcome),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "OAuth callback",
    description = "Validates the state token, exchanges the code and checks guild membership",
)]
async fn route_oauth_callback(
    State(service): State<GuildAuthService>,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    let session_state = jar
        .get(OAUTH_STATE_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string());

    let params = CallbackParams {
        code: query.code,
        state: query.state,
        error: query.error,
        session_state,
    };

    // The state is spent either way, so the cookie has served its purpose.
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE_NAME).path("/").build());

    match service.flow().handle_callback(params).await {
        Ok(outcome) => (jar, outcome_response(outcome)).into_response(),
        Err(e) => (jar, e.into_response()).into_response(),
    }
}

/// Complete a first login by choosing an account name
#[utoipa::path(
    post,
    path = format!("{}/{}/{}/oauth/username", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY],
    request_body = ChooseUsernameRequest,
    responses(
        (status = 200, description = "Account created", body = AuthOutcome),
        (status = 400, description = "Unknown stash or rejected name", body = AuthOutcome),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Choose account name",
    description = "Creates the account for a verified identity parked by the callback",
)]
async fn route_choose_username(
    State(service): State<GuildAuthService>,
    Json(body): Json<ChooseUsernameRequest>,
) -> Response {
    match service
        .flow()
        .complete_name_choice(&body.stash_token, &body.username)
        .await
    {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => e.into_response(),
    }
}
