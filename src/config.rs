use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Sends allowed per user per window.
    pub message_per_window: u32,
    /// Uploads allowed per user per window; uploads are more expensive.
    pub upload_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            message_per_window: 30,
            upload_per_window: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub rate_limits: RateLimitSettings,
    pub typing_timeout: Duration,
    pub max_text_len: usize,
    pub max_upload_bytes: u64,
    pub fcm: Option<FcmConfig>,
    pub email: Option<EmailSettings>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = env_parse("PORT", 3000);
        // No DATABASE_URL means the in-memory stores: useful for local runs
        // and the test suite, never for production.
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET is empty".into()));
        }

        let rate_limits = RateLimitSettings {
            message_per_window: env_parse("RATE_LIMIT_MESSAGES_PER_WINDOW", 30),
            upload_per_window: env_parse("RATE_LIMIT_UPLOADS_PER_WINDOW", 10),
            window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60)),
        };
        if rate_limits.message_per_window == 0 || rate_limits.upload_per_window == 0 {
            return Err(AppError::Config("rate limit thresholds must be positive".into()));
        }

        let typing_timeout = Duration::from_secs(env_parse("TYPING_TIMEOUT_SECS", 6));
        let max_text_len = env_parse("MAX_MESSAGE_TEXT_LEN", 4096);
        let max_upload_bytes = env_parse("MAX_UPLOAD_BYTES", 10 * 1024 * 1024);

        let fcm = match env::var("FCM_API_KEY") {
            Ok(api_key) if !api_key.trim().is_empty() => Some(FcmConfig { api_key }),
            _ => None,
        };

        let email = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => {
                let smtp_from = env::var("SMTP_FROM")
                    .map_err(|_| AppError::Config("SMTP_FROM missing".into()))?;
                Some(EmailSettings {
                    smtp_host: host,
                    smtp_port: env_parse("SMTP_PORT", 587),
                    smtp_username: env::var("SMTP_USERNAME").ok(),
                    smtp_password: env::var("SMTP_PASSWORD").ok(),
                    smtp_from,
                    use_starttls: env::var("SMTP_STARTTLS")
                        .map(|v| v.eq_ignore_ascii_case("true"))
                        .unwrap_or(true),
                })
            }
            _ => None,
        };

        Ok(Self {
            port,
            database_url,
            redis_url,
            jwt_secret,
            rate_limits,
            typing_timeout,
            max_text_len,
            max_upload_bytes,
            fcm,
            email,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            port: 3000,
            database_url: None,
            redis_url: None,
            jwt_secret: "test-secret".into(),
            rate_limits: RateLimitSettings::default(),
            typing_timeout: Duration::from_secs(6),
            max_text_len: 4096,
            max_upload_bytes: 10 * 1024 * 1024,
            fcm: None,
            email: None,
        }
    }
}
