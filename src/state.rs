use crate::auth::SessionService;
use crate::config::AppConfig;
use crate::users::UserStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UserStore>,
    pub sessions: Arc<SessionService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let sessions = Arc::new(SessionService::new(&config.session)?);
        let store = Arc::new(UserStore::open(&config.store));

        Ok(Self::from_parts(store, sessions, config))
    }

    pub fn from_parts(
        store: Arc<UserStore>,
        sessions: Arc<SessionService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{SessionConfig, StoreConfig};
        use crate::users::backend::InMemoryBackend;

        let config = Arc::new(AppConfig {
            session: SessionConfig::new("test-secret-0123456789"),
            store: StoreConfig {
                path: "unused/users.json".into(),
            },
        });
        let sessions =
            Arc::new(SessionService::new(&config.session).expect("test session config is valid"));
        let store = Arc::new(UserStore::new(Arc::new(InMemoryBackend::new())));

        Self::from_parts(store, sessions, config)
    }
}
