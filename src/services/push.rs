//! Push gateway. The dispatcher depends only on the trait; FCM is the
//! shipped implementation and APNs would slot in alongside it.

use async_trait::async_trait;
use fcm::{Client, MessageBuilder, NotificationBuilder};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::FcmConfig;
use crate::error::AppError;

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(
        &self,
        device_token: String,
        title: String,
        body: String,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct FcmPush {
    client: Arc<Client>,
    api_key: String,
}

impl FcmPush {
    pub fn new(config: &FcmConfig) -> Result<Self, AppError> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::Config("FCM_API_KEY is empty".into()));
        }
        Ok(Self {
            client: Arc::new(Client::new()),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PushProvider for FcmPush {
    async fn send(
        &self,
        device_token: String,
        title: String,
        body: String,
    ) -> Result<(), AppError> {
        let mut notification_builder = NotificationBuilder::new();
        notification_builder
            .title(&title)
            .body(&body)
            .sound("default");
        let notification = notification_builder.finalize();

        let mut message_builder = MessageBuilder::new(&self.api_key, &device_token);
        message_builder.notification(notification);
        let message = message_builder.finalize();

        match self.client.send(message).await {
            Ok(response) => {
                // Log only a token prefix for privacy
                info!(
                    token_prefix = &device_token[..device_token.len().min(8)],
                    message_id = ?response.message_id,
                    "push notification sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    token_prefix = &device_token[..device_token.len().min(8)],
                    error = %e,
                    "push send failed"
                );
                Err(AppError::DeliveryDegraded(format!("fcm: {e}")))
            }
        }
    }
}
