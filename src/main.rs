use std::sync::Arc;

use artisa_messaging::config::Config;
use artisa_messaging::error::AppError;
use artisa_messaging::presence::PresenceTracker;
use artisa_messaging::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
use artisa_messaging::services::conversation_service::ConversationService;
use artisa_messaging::services::email::EmailService;
use artisa_messaging::services::message_service::MessageService;
use artisa_messaging::services::notification_service::NotificationDispatcher;
use artisa_messaging::services::push::{FcmPush, PushProvider};
use artisa_messaging::state::AppState;
use artisa_messaging::store::{
    ImageStorage, MemoryDirectory, MemoryImageStorage, MemoryMessageStore, MemoryPreferenceStore,
    MessageStore, ParticipantDirectory, PgDirectory, PgImageStorage, PgMessageStore,
    PgPreferenceStore, PreferenceStore,
};
use artisa_messaging::websocket::ConnectionRegistry;
use artisa_messaging::{db, logging, routes};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let config = Arc::new(Config::from_env()?);

    // Durable collaborators: Postgres when configured, in-memory otherwise
    // (local development only).
    let (store, directory, preferences, uploads): (
        Arc<dyn MessageStore>,
        Arc<dyn ParticipantDirectory>,
        Arc<dyn PreferenceStore>,
        Arc<dyn ImageStorage>,
    ) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::init_pool(database_url)
                .await
                .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;
            (
                Arc::new(PgMessageStore::new(pool.clone())),
                Arc::new(PgDirectory::new(pool.clone())),
                Arc::new(PgPreferenceStore::new(pool)),
                Arc::new(PgImageStorage::new("https://cdn.artisa.example/uploads")),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (development only)");
            (
                Arc::new(MemoryMessageStore::new()),
                Arc::new(MemoryDirectory::new()),
                Arc::new(MemoryPreferenceStore::new()),
                Arc::new(MemoryImageStorage::new()),
            )
        }
    };

    // Rate-limit counters: shared store when Redis is configured, so every
    // instance sees the same windows.
    let counters: Arc<dyn CounterStore> = match config.redis_url.as_deref() {
        Some(redis_url) => Arc::new(RedisCounterStore::connect(redis_url).await?),
        None => Arc::new(MemoryCounterStore::new()),
    };
    let rate_limiter = Arc::new(RateLimiter::new(counters, config.rate_limits.clone()));

    let push: Option<Arc<dyn PushProvider>> = match config.fcm.as_ref() {
        Some(fcm_cfg) => match FcmPush::new(fcm_cfg) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to initialize FCM client; push delivery disabled");
                None
            }
        },
        None => None,
    };
    let email = match config.email.as_ref() {
        Some(email_cfg) => Some(EmailService::new(email_cfg)?),
        None => None,
    };

    let registry = ConnectionRegistry::new();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry.clone(),
        directory.clone(),
        preferences.clone(),
        push,
        email,
    ));
    let presence = Arc::new(PresenceTracker::new(
        registry.clone(),
        store.clone(),
        config.typing_timeout,
    ));
    let conversations = Arc::new(ConversationService::new(store.clone(), directory.clone()));
    let messages = Arc::new(MessageService::new(
        store,
        directory,
        registry.clone(),
        rate_limiter.clone(),
        dispatcher.clone(),
        config.max_text_len,
    ));

    let state = AppState {
        config: config.clone(),
        registry,
        rate_limiter,
        presence,
        conversations,
        messages,
        dispatcher,
        preferences,
        uploads,
    };

    let app = routes::build_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%bind_addr, "starting artisa-messaging");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    Ok(())
}
