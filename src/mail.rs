//! Outgoing email.
//!
//! Messages are queued for a background worker. When the queue is full,
//! closed or not running, the send happens inline with a timeout instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Default capacity of the delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub const VERIFICATION_SUBJECT: &str = "Your verification code";
pub const PASSWORD_RESET_SUBJECT: &str = "Your password reset code";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("email transport failed: {0}")]
    Transport(String),
    #[error("email send timed out")]
    Timeout,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Transport that only logs. Message bodies are not logged since they carry codes.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "Email send stub");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Mailer {
    queue: Option<mpsc::Sender<OutgoingEmail>>,
    transport: Arc<dyn EmailTransport>,
    timeout: Duration,
}

impl Mailer {
    /// Start a worker task draining a bounded queue into `transport`.
    pub fn spawn(transport: Arc<dyn EmailTransport>, capacity: usize, timeout: Duration) -> Self {
        let (sender, mut receiver) = mpsc::channel::<OutgoingEmail>(capacity.max(1));
        let worker_transport = transport.clone();

        tokio::spawn(async move {
            while let Some(email) = receiver.recv().await {
                match tokio::time::timeout(timeout, worker_transport.send(&email)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(to = %email.to, error = %e, "Queued email failed"),
                    Err(_) => error!(to = %email.to, "Queued email timed out"),
                }
            }
        });

        Self {
            queue: Some(sender),
            transport,
            timeout,
        }
    }

    /// A mailer without a queue: every send happens inline.
    pub fn direct(transport: Arc<dyn EmailTransport>, timeout: Duration) -> Self {
        Self {
            queue: None,
            transport,
            timeout,
        }
    }

    /// Hand off an email. Returns whether it was queued or sent.
    ///
    /// Never fails: a `false` result means the recipient will not get this
    /// message and may ask for another.
    pub async fn deliver(&self, email: OutgoingEmail) -> bool {
        let email = match &self.queue {
            Some(queue) => match queue.try_send(email) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(email)) => {
                    warn!(to = %email.to, "Email queue full, sending inline");
                    email
                }
                Err(mpsc::error::TrySendError::Closed(email)) => {
                    warn!(to = %email.to, "Email queue closed, sending inline");
                    email
                }
            },
            None => email,
        };

        match tokio::time::timeout(self.timeout, self.transport.send(&email)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(to = %email.to, error = %e, "Email could not be sent");
                false
            }
            Err(_) => {
                error!(to = %email.to, error = %MailError::Timeout, "Email could not be sent");
                false
            }
        }
    }
}

/// Body of the email carrying an email verification code.
pub fn verification_body(code: &str, ttl: Duration) -> String {
    format!(
        "Your verification code is: {}\n\nIt will expire in {} minute(s). If you did not request this, ignore this email.",
        code,
        ttl.as_secs() / 60
    )
}

/// Body of the email carrying a password reset code.
pub fn password_reset_body(code: &str, ttl: Duration) -> String {
    format!(
        "You requested a password reset. Your password reset code is: {}\n\nIt will expire in {} minute(s). If you did not request this, please ignore this email or contact support.",
        code,
        ttl.as_secs() / 60
    )
}

/// Transports for tests and local development.
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every message it is asked to send.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
        }

        /// The last message sent to `to`, if any.
        pub fn last_to(&self, to: &str) -> Option<OutgoingEmail> {
            self.sent().into_iter().rev().find(|email| email.to == to)
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Transport("smtp down".into()));
            }
            self.sent
                .lock()
                .map_err(|_| MailError::Transport("recorder poisoned".into()))?
                .push(email.clone());
            Ok(())
        }
    }
}
