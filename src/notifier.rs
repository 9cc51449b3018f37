use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, NotifyConfig, Thresholds};
use crate::error::{AppError, NotifyError, Result};
use crate::types::{Alert, AlertKind};

/// Outbound notification collaborator. `Ok(())` means delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipient: &str) -> std::result::Result<(), NotifyError>;

    /// Default recipient configured out-of-band.
    fn recipient(&self) -> &str;

    /// Short label for logs.
    fn transport(&self) -> &'static str;
}

/// SMTP when the EMAIL_* settings are complete, the webhook instead when
/// NOTIFY_WEBHOOK_URL is also set, otherwise a notifier that never delivers.
pub fn from_config(cfg: &Config) -> Result<Box<dyn Notifier>> {
    let notify = &cfg.notify;
    if !notify.is_complete() {
        warn!("Email settings incomplete; alerts will be stored but not delivered");
        return Ok(Box::new(DisabledNotifier));
    }
    if notify.uses_webhook() {
        info!(url = %notify.webhook_url, "Alert mail via webhook");
        Ok(Box::new(WebhookNotifier::new(notify, cfg.http_timeout_secs)?))
    } else {
        info!(server = %notify.smtp_server, port = notify.smtp_port, "Alert mail via SMTP");
        Ok(Box::new(SmtpNotifier::new(notify, cfg.http_timeout_secs)?))
    }
}

// ---------------------------------------------------------------------------
// SMTP (STARTTLS)
// ---------------------------------------------------------------------------

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: String,
}

impl SmtpNotifier {
    pub fn new(notify: &NotifyConfig, timeout_secs: u64) -> Result<Self> {
        let sender: Mailbox = notify
            .sender
            .parse()
            .map_err(|e| AppError::Config(format!("EMAIL_SENDER is not a mail address: {e}")))?;
        notify
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("EMAIL_RECIPIENT is not a mail address: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&notify.smtp_server)
            .map_err(|e| AppError::Config(format!("SMTP_SERVER {:?}: {e}", notify.smtp_server)))?
            .port(notify.smtp_port)
            .credentials(Credentials::new(notify.sender.clone(), notify.secret.clone()))
            .timeout(Some(Duration::from_secs(timeout_secs)))
            .build();

        Ok(Self {
            transport,
            sender,
            recipient: notify.recipient.clone(),
        })
    }
}

/// Single-part HTML message.
pub fn build_message(
    sender: &Mailbox,
    recipient: &str,
    subject: &str,
    html: &str,
) -> std::result::Result<Message, NotifyError> {
    let message = Message::builder()
        .from(sender.clone())
        .to(recipient.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())?;
    Ok(message)
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str, recipient: &str) -> std::result::Result<(), NotifyError> {
        let message = build_message(&self.sender, recipient, subject, body)?;
        self.transport.send(message).await?;
        Ok(())
    }

    fn recipient(&self) -> &str {
        &self.recipient
    }

    fn transport(&self) -> &'static str {
        "smtp"
    }
}

// ---------------------------------------------------------------------------
// Webhook (JSON mail API)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    sender: String,
    secret: String,
    recipient: String,
}

impl WebhookNotifier {
    pub fn new(notify: &NotifyConfig, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: notify.webhook_url.clone(),
            sender: notify.sender.clone(),
            secret: notify.secret.clone(),
            recipient: notify.recipient.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str, recipient: &str) -> std::result::Result<(), NotifyError> {
        let payload = WebhookPayload {
            from: &self.sender,
            to: recipient,
            subject,
            html: body,
        };
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.secret)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }

    fn recipient(&self) -> &str {
        &self.recipient
    }

    fn transport(&self) -> &'static str {
        "webhook"
    }
}

/// Used when credentials are missing. Never delivers.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _subject: &str, _body: &str, _recipient: &str) -> std::result::Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }

    fn recipient(&self) -> &str {
        ""
    }

    fn transport(&self) -> &'static str {
        "disabled"
    }
}

// ---------------------------------------------------------------------------
// Email rendering
// ---------------------------------------------------------------------------

/// Every interpolated value is HTML-escaped by the template.
#[derive(Template)]
#[template(path = "alert_email.html")]
struct AlertEmail<'a> {
    symbol: &'a str,
    label: &'a str,
    message: &'a str,
    threshold: String,
    benchmark: &'a str,
    kind: &'a str,
    change: String,
    benchmark_change: String,
    relative: String,
    current: String,
    previous: String,
    time: String,
}

fn kind_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::RelativeDrop => "underperforming the market",
        AlertKind::AbsoluteDrop => "daily drop",
        AlertKind::HourlyDrop => "drop since last sample",
    }
}

fn threshold_for(kind: AlertKind, t: &Thresholds) -> f64 {
    match kind {
        AlertKind::RelativeDrop => t.relative_drop_pct,
        AlertKind::AbsoluteDrop => t.daily_drop_pct,
        AlertKind::HourlyDrop => t.hourly_drop_pct,
    }
}

fn pct_cell(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}%")).unwrap_or_else(|| "n/a".to_string())
}

/// Returns `(subject, html_body)` for one alert.
pub fn render_alert_email(
    alert: &Alert,
    benchmark_symbol: &str,
    t: &Thresholds,
) -> std::result::Result<(String, String), NotifyError> {
    let c = &alert.candidate;
    let subject = format!(
        "NASDAQ Alert: {} {} {:.2}%",
        c.symbol, c.kind, c.price_change_percent
    );

    let body = AlertEmail {
        symbol: &c.symbol,
        label: kind_label(c.kind),
        message: &alert.message,
        threshold: format!("{:.2}%", threshold_for(c.kind, t)),
        benchmark: benchmark_symbol,
        kind: c.kind.as_str(),
        change: format!("{:.2}%", c.price_change_percent),
        benchmark_change: pct_cell(c.benchmark_change_percent),
        relative: pct_cell(c.relative_change_percent),
        current: format!("${:.2}", c.current_price),
        previous: format!("${:.2}", c.previous_price),
        time: alert.created_at.format("%Y-%m-%d %H:%M").to_string(),
    }
    .render()?;

    Ok((subject, body))
}
