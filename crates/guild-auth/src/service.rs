use std::sync::Arc;

use crate::logic::auth_flow::AuthFlowController;
use crate::logic::discord::DiscordClient;
use crate::logic::settings::AuthSettings;
use crate::repository::sqlite::Repository;

/// Parameters for constructing a GuildAuthService
pub struct GuildAuthServiceParams {
    pub repository: Arc<Repository>,
    pub discord: Arc<DiscordClient>,
    pub settings: AuthSettings,
}

#[derive(Clone)]
pub struct GuildAuthService {
    pub repository: Arc<Repository>,
    pub discord: Arc<DiscordClient>,
    pub settings: AuthSettings,
}

impl GuildAuthService {
    pub fn new(params: GuildAuthServiceParams) -> Self {
        Self {
            repository: params.repository,
            discord: params.discord,
            settings: params.settings,
        }
    }

    /// Flow controller bound to this service's repository and upstream
    /// client. Cheap to build per request.
    pub fn flow(&self) -> AuthFlowController<Repository, DiscordClient> {
        AuthFlowController::new(
            self.repository.as_ref().clone(),
            self.discord.as_ref().clone(),
            self.settings.clone(),
        )
    }
}
