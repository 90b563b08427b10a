use std::sync::Arc;

use tracing::{info, warn};

use super::{
    config::{Backend, Config},
    mailer::{LogTransport, MailTransport, SmtpTransport},
    queue::EmailQueue,
    search::{SearchIndex, init_meilisearch},
    session::{MemorySessions, RedisSessions, SessionStore},
    store::{MemoryStore, RedisStore, SubmissionStore, redis::init_redis},
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SubmissionStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub search: Option<SearchIndex>,
    pub queue: EmailQueue,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let (store, sessions): (Arc<dyn SubmissionStore>, Arc<dyn SessionStore>) =
            match config.backend {
                Backend::Redis => {
                    info!("Connecting to Redis...");
                    let connection = init_redis(&config.redis_url).await?;

                    (
                        Arc::new(RedisStore::new(connection.clone())),
                        Arc::new(RedisSessions::new(connection)),
                    )
                }
                Backend::Memory => {
                    warn!("Using in-memory store, submissions will not survive a restart");

                    (Arc::new(MemoryStore::new()), Arc::new(MemorySessions::new()))
                }
            };

        let search = match &config.meili_url {
            Some(url) => match init_meilisearch(url, config.meili_key.as_deref()).await {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!("Meilisearch unavailable, admin search disabled: {e}");
                    None
                }
            },
            None => None,
        };

        let transport: Arc<dyn MailTransport> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpTransport::new(smtp, &config.mail_from)?),
            None => Arc::new(LogTransport),
        };

        let queue = EmailQueue::restore(config.queue.clone(), transport).await;

        Ok(Arc::new(Self {
            config,
            store,
            sessions,
            search,
            queue,
        }))
    }

    /// Process-local state with no external services.
    pub fn in_memory(config: Config, transport: Arc<dyn MailTransport>) -> Arc<Self> {
        let queue = EmailQueue::new(config.queue.clone(), transport);

        Arc::new(Self {
            config,
            store: Arc::new(MemoryStore::new()),
            sessions: Arc::new(MemorySessions::new()),
            search: None,
            queue,
        })
    }
}
