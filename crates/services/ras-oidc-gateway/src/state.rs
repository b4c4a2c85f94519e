use crate::config::Config;
use anyhow::{Context, Result};
use ras_identity_oidc::OidcClient;
use ras_identity_session::SessionService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything the handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub oidc: OidcClient,
    pub sessions: Arc<SessionService>,
    pub post_login_url: Arc<str>,
}

impl AppState {
    pub fn new(oidc: OidcClient, sessions: Arc<SessionService>, post_login_url: &str) -> Self {
        Self {
            oidc,
            sessions,
            post_login_url: Arc::from(post_login_url),
        }
    }

    /// Resolve providers (running discovery where configured) and set up
    /// the session service.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let oidc = OidcClient::from_config(&config.oidc_config())
            .await
            .context("Failed to initialise identity providers")?;
        let sessions = Arc::new(SessionService::new(config.session_config()));

        Ok(Self::new(oidc, sessions, &config.oidc.post_login_url))
    }

    /// Drop expired login states and sessions.
    pub async fn sweep(&self) -> (usize, usize) {
        let states = match self.oidc.state_store().cleanup_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to clean up login states: {}", e);
                0
            }
        };
        let sessions = self.sessions.cleanup_expired().await;
        (states, sessions)
    }
}

/// Run [`AppState::sweep`] on a fixed interval until the runtime shuts down.
pub fn spawn_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (states, sessions) = state.sweep().await;
            if states > 0 || sessions > 0 {
                debug!(states, sessions, "Swept expired records");
            }
        }
    })
}
