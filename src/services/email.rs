//! Transactional email gateway over async SMTP.
//!
//! If SMTP is not configured the service operates in no-op mode (logs only),
//! which keeps development and test environments free of email
//! infrastructure.

use std::sync::Arc;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use crate::config::EmailSettings;
use crate::error::AppError;

#[derive(Clone)]
pub struct EmailService {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl EmailService {
    pub fn new(config: &EmailSettings) -> Result<Self, AppError> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("invalid SMTP_FROM address: {e}")))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email service will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| AppError::Config(format!("failed to configure SMTP transport: {e}")))?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// New-message notification: subject from the sender's name, preview in
    /// the body.
    pub async fn send_message_notification(
        &self,
        recipient: &str,
        sender_name: &str,
        preview: &str,
    ) -> Result<(), AppError> {
        let subject = format!("New message from {sender_name} on Artisa");
        let html_body = format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
    <h2>{sender_name} sent you a message</h2>
    <p style="background: #f5f5f5; padding: 14px; border-radius: 6px;">{preview}</p>
    <p style="color: #666; font-size: 14px;">
        Open Artisa to reply. You can turn these emails off in your notification settings.
    </p>
</body>
</html>"#,
        );
        let text_body = format!(
            "{sender_name} sent you a message:\n\n{preview}\n\n\
            Open Artisa to reply. You can turn these emails off in your notification settings.",
        );

        self.send_html_email(recipient, &subject, &html_body, &text_body)
            .await
    }

    async fn send_html_email(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), AppError> {
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::DeliveryDegraded(format!("invalid recipient address: {e}")))?;

        let Some(transport) = &self.transport else {
            info!(%recipient, %subject, "no-op email mode: skipping SMTP send");
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text_body.to_string(),
                html_body.to_string(),
            ))
            .map_err(|e| AppError::DeliveryDegraded(format!("build email: {e}")))?;

        transport
            .send(message)
            .await
            .map_err(|e| AppError::DeliveryDegraded(format!("smtp send: {e}")))?;

        Ok(())
    }
}
