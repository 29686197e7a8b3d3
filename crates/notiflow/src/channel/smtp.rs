//! SMTP mailer built on lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;

use super::{ChannelError, Mailer, OutgoingEmail, StepContext};

/// SMTP relay settings.
///
/// ```toml
/// host = "smtp.example.com"
/// from = "Avisos <avisos@example.com>"
/// username = "avisos@example.com"
/// password = "..."
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Avisos <avisos@example.com>`.
    pub from: String,
    /// Use STARTTLS; plain connections are only meant for local relays.
    #[serde(default = "default_true")]
    pub starttls: bool,
}

fn default_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// A [`Mailer`] that sends HTML email through an SMTP relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ChannelError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| ChannelError::InvalidAddress(format!("{}: {e}", config.from)))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| ChannelError::Email(format!("SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail, ctx: &StepContext) -> Result<(), ChannelError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| ChannelError::InvalidAddress(format!("{}: {e}", email.to)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| ChannelError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Email(e.to_string()))?;

        tracing::debug!(batch_id = %ctx.batch_id, to = %email.to, "Email sent");
        Ok(())
    }
}
