use anyhow::{Context, bail};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use pkg_constants::network::{MAIL_SENDER_NAME, SMTPS_PORT};
use serde::Serialize;
use tracing::{debug, info};

/// Delivers an HTML message to a set of recipients. Best effort: callers
/// log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, html_body: &str, recipients: &[String]) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

/// Hands messages to an HTTP mail relay as JSON.
#[derive(Clone)]
pub struct RelayNotifier {
    relay_url: String,
    from: String,
    http: reqwest::Client,
}

impl RelayNotifier {
    pub fn new(relay_url: &str, from: &str, http: reqwest::Client) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            from: from.to_string(),
            http,
        }
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn send(&self, subject: &str, html_body: &str, recipients: &[String]) -> anyhow::Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        let message = RelayMessage {
            from: &self.from,
            to: recipients,
            subject,
            html: html_body,
        };
        let resp = self
            .http
            .post(&self.relay_url)
            .json(&message)
            .send()
            .await
            .context("mail relay unreachable")?;
        if !resp.status().is_success() {
            bail!("mail relay returned {}", resp.status());
        }
        Ok(())
    }
}

/// SMTP account the [`SmtpNotifier`] sends through.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Sends HTML mail over SMTP. Port 465 speaks TLS from the first byte;
/// any other port upgrades with STARTTLS when the server offers it.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let tls = TlsParameters::new(config.host.clone())
            .with_context(|| format!("invalid SMTP host {}", config.host))?;
        let tls = if config.port == SMTPS_PORT {
            Tls::Wrapper(tls)
        } else {
            Tls::Opportunistic(tls)
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls);
        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }
        let from = Mailbox::new(
            Some(MAIL_SENDER_NAME.to_string()),
            config
                .from
                .parse()
                .with_context(|| format!("invalid sender address {}", config.from))?,
        );
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> anyhow::Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for to in recipients {
            let mailbox: Mailbox = to
                .parse()
                .with_context(|| format!("invalid recipient address {}", to))?;
            builder = builder.to(mailbox);
        }
        builder
            .body(html_body.to_string())
            .context("failed to build mail message")
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, html_body: &str, recipients: &[String]) -> anyhow::Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        let message = self.build_message(subject, html_body, recipients)?;
        let response = self
            .transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        debug!(code = %response.code(), "mail accepted");
        Ok(())
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, _html_body: &str, recipients: &[String]) -> anyhow::Result<()> {
        info!(to = %recipients.join(","), "notification: {}", subject);
        Ok(())
    }
}
