/// Email notifications
///
/// Handlers never send mail inline; they hand a [`Notification`] to the
/// background task registry, which calls a [`Notifier`].
use crate::{
    config::EmailConfig,
    error::{ApiError, ApiResult},
    metrics,
};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, Message, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(5);
const SMTP_SUBMISSION_PORT: u16 = 587;
const SMTPS_PORT: u16 = 465;

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte (SMTPS)
    Wrapper,
    /// Plain greeting, then upgraded with STARTTLS
    StartTls,
}

/// Parsed `smtp://` or `smtps://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub credentials: Option<(String, String)>,
}

impl SmtpEndpoint {
    /// `smtp[s]://[user[:password]@]host[:port]`, credentials percent-decoded.
    ///
    /// `smtps` or port 465 means implicit TLS; any other port upgrades with
    /// STARTTLS. The default port is 587 for `smtp` and 465 for `smtps`.
    pub fn parse(url: &str) -> ApiResult<Self> {
        let invalid = |reason: &str| ApiError::Internal(format!("Invalid SMTP URL: {}", reason));

        let (implicit_tls, rest) = if let Some(rest) = url.strip_prefix("smtps://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("smtp://") {
            (false, rest)
        } else {
            return Err(invalid("scheme must be smtp:// or smtps://"));
        };
        let rest = rest.trim_end_matches('/');

        // The password may itself contain '@'; the host part never does.
        let (userinfo, authority) = match rest.rsplit_once('@') {
            Some((userinfo, authority)) => (Some(userinfo), authority),
            None => (None, rest),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| invalid(&format!("bad port {}", port)))?,
            ),
            None if implicit_tls => (authority, SMTPS_PORT),
            None => (authority, SMTP_SUBMISSION_PORT),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let credentials = match userinfo {
            None => None,
            Some(userinfo) => {
                let (user, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                Some((decode_component(user)?, decode_component(password)?))
            }
        };

        let security = if implicit_tls || port == SMTPS_PORT {
            SmtpSecurity::Wrapper
        } else {
            SmtpSecurity::StartTls
        };

        Ok(Self {
            host: host.to_string(),
            port,
            security,
            credentials,
        })
    }
}

fn decode_component(raw: &str) -> ApiResult<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ApiError::Internal(format!("Invalid SMTP URL credentials: {}", e)))
}

/// "3 days", "45 minutes", "1 hour"
fn describe_lifetime(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    let (count, unit) = if secs >= 86_400 && secs % 86_400 == 0 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        (secs / 3_600, "hour")
    } else if secs >= 60 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Messages the API sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Sent after registration with the activation token
    Welcome {
        user_id: i64,
        activation_token: String,
        expires_in: Duration,
    },
    PasswordReset {
        token: String,
        expires_in: Duration,
    },
}

impl Notification {
    /// Template name used in logs and metrics
    pub fn template(&self) -> &'static str {
        match self {
            Notification::Welcome { .. } => "welcome",
            Notification::PasswordReset { .. } => "password_reset",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Notification::Welcome { .. } => "Welcome to Blackbox!",
            Notification::PasswordReset { .. } => "Reset your Blackbox password",
        }
    }

    pub fn plain_body(&self) -> String {
        match self {
            Notification::Welcome {
                user_id,
                activation_token,
                expires_in,
            } => format!(
                "Hi,\n\n\
                 Thanks for signing up for a Blackbox account. For future reference, \
                 your user ID number is {user_id}.\n\n\
                 Please send a request to the `PUT /api/v1/users/activate` endpoint with \
                 the following JSON body to activate your account:\n\n\
                 {{\"token\": \"{activation_token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in {}.\n\n\
                 Thanks,\n\nThe Blackbox Team\n",
                describe_lifetime(*expires_in)
            ),
            Notification::PasswordReset { token, expires_in } => format!(
                "Hi,\n\n\
                 Please send a `PUT /api/v1/tokens/password-reset` request with the \
                 following JSON body to set a new password:\n\n\
                 {{\"password\": \"your new password\", \"token\": \"{token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in {}. \
                 If you need another token please make a \
                 `POST /api/v1/tokens/password-reset/request` request.\n\n\
                 Thanks,\n\nThe Blackbox Team\n",
                describe_lifetime(*expires_in)
            ),
        }
    }

    pub fn html_body(&self) -> String {
        let paragraphs: String = self
            .plain_body()
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .map(|p| format!("<p>{}</p>\n", escape_html(p.trim())))
            .collect();
        format!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n</head>\n<body>\n{}</body>\n</html>\n",
            paragraphs
        )
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, notification: &Notification) -> ApiResult<()>;
}

/// SMTP mailer
#[derive(Clone)]
pub struct Mailer {
    from: Option<Mailbox>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl Mailer {
    /// Create a new mailer; `None` disables sending
    pub fn new(config: Option<EmailConfig>) -> ApiResult<Self> {
        let Some(config) = config else {
            return Ok(Self {
                from: None,
                transport: None,
            });
        };

        let endpoint = SmtpEndpoint::parse(&config.smtp_url)?;
        let builder = match endpoint.security {
            SmtpSecurity::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host),
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
            }
        }
        .map_err(|e| ApiError::Internal(format!("SMTP setup failed: {}", e)))?
        .port(endpoint.port)
        .timeout(Some(SMTP_TIMEOUT));

        let builder = match endpoint.credentials {
            Some((username, password)) => builder.credentials(Credentials::new(username, password)),
            None => builder,
        };
        let transport = builder.build();

        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| ApiError::Internal(format!("Invalid from address: {}", e)))?;

        Ok(Self {
            from: Some(from),
            transport: Some(transport),
        })
    }

    /// Check if email is configured
    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    fn build_message(from: Mailbox, recipient: &str, notification: &Notification) -> ApiResult<Message> {
        Message::builder()
            .from(from)
            .to(recipient
                .parse()
                .map_err(|e| ApiError::Internal(format!("Invalid to address: {}", e)))?)
            .subject(notification.subject())
            .multipart(MultiPart::alternative_plain_html(
                notification.plain_body(),
                notification.html_body(),
            ))
            .map_err(|e| ApiError::Internal(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn send(&self, recipient: &str, notification: &Notification) -> ApiResult<()> {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            tracing::warn!(
                template = notification.template(),
                "Email not configured, skipping message"
            );
            metrics::record_email(notification.template(), "skipped");
            return Ok(());
        };

        let message = Self::build_message(from.clone(), recipient, notification)?;
        match transport.send(message).await {
            Ok(_) => {
                metrics::record_email(notification.template(), "sent");
                tracing::info!(template = notification.template(), "sent email");
                Ok(())
            }
            Err(e) => {
                metrics::record_email(notification.template(), "failed");
                Err(ApiError::Internal(format!("Failed to send email: {}", e)))
            }
        }
    }
}

/// Captures notifications instead of sending them
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(String, Notification)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// Most recent activation token sent to `recipient`
    pub fn activation_token_for(&self, recipient: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|(to, n)| match n {
            Notification::Welcome {
                activation_token, ..
            } if to == recipient => Some(activation_token),
            _ => None,
        })
    }

    pub fn reset_token_for(&self, recipient: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|(to, n)| match n {
            Notification::PasswordReset { token, .. } if to == recipient => Some(token),
            _ => None,
        })
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> ApiResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), notification.clone()));
        Ok(())
    }
}
