use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use lesprivate_common::AppError;

use crate::config::EmailConfig;

#[derive(Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        if !config.enabled {
            return Ok(Self {
                transport: AsyncSmtpTransport::<Tokio1Executor>::unencrypted_localhost(),
                config: config.clone(),
            });
        }

        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| AppError::Internal(format!("SMTP relay error: {}", e)))?
            .port(config.smtp_port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .build();

        Ok(Self {
            transport,
            config: config.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if !self.config.enabled {
            tracing::debug!(to, subject, "Email disabled, skipping");
            return Ok(());
        }

        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid recipient address: {}", e)))?;

        let mut builder = Message::builder().from(from).to(to_mailbox).subject(subject);
        if let Some(reply_to) = &self.config.reply_to {
            let reply_to: Mailbox = reply_to
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid reply-to address: {}", e)))?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to send email: {}", e)))?;

        tracing::info!(to, subject, "Email sent");
        Ok(())
    }
}
