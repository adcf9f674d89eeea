use std::time::Duration;

use log::{info, warn};
use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::error::EtlError;

pub const MAILTRAP_API_URL: &str = "https://send.api.mailtrap.io/api/send";

/// Publish a short message to one fixed destination.
pub trait Notifier {
    fn publish(&self, subject: &str, body: &str) -> Result<(), EtlError>;
}

/// Send notifications as plain text emails using the Mailtrap API.  The
/// topic is the recipient address.
pub struct MailtrapNotifier {
    pub api_url: String,
    pub from: String,
    pub topic: String,
    api_key: String,
    client: Client,
}

impl MailtrapNotifier {
    pub fn new(from: String, topic: String, api_key: String) -> Self {
        MailtrapNotifier {
            api_url: MAILTRAP_API_URL.to_string(),
            from,
            topic,
            api_key,
            client: Client::new(),
        }
    }

    pub fn payload(&self, subject: &str, body: &str) -> Value {
        json!({
            "from": {"email": self.from},
            "to": [{"email": self.topic}],
            "subject": subject,
            "text": body,
        })
    }
}

impl Notifier for MailtrapNotifier {
    fn publish(&self, subject: &str, body: &str) -> Result<(), EtlError> {
        let failed = |reason: String| EtlError::Notification {
            attempts: 1,
            reason,
        };
        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Api-Token", &self.api_key)
            .body(self.payload(subject, body).to_string())
            .send()
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(failed(format!("status {}, response body: {}", status, text)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_wait: Duration::from_millis(500),
        }
    }
}

/// Publish, retrying with a doubling wait.  Returns the last error once
/// `max_attempts` is reached.
pub fn notify_with_retry<N: Notifier + ?Sized>(
    notifier: &N,
    subject: &str,
    body: &str,
    policy: RetryPolicy,
) -> Result<(), EtlError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    let mut wait_duration = policy.initial_wait;

    loop {
        match notifier.publish(subject, body) {
            Ok(_) => {
                info!("Notification '{}' sent", subject);
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    let reason = match e {
                        EtlError::Notification { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    return Err(EtlError::Notification { attempts, reason });
                }
                warn!(
                    "Retrying notification after error: {} (attempt {}/{})",
                    e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};

    use super::Notifier;
    use crate::error::EtlError;

    /// Keeps every delivered message.  The first `failures` publishes fail.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: RefCell<Vec<(String, String)>>,
        pub calls: Cell<u32>,
        pub failures: u32,
    }

    impl RecordingNotifier {
        pub(crate) fn failing(failures: u32) -> Self {
            RecordingNotifier {
                failures,
                ..Default::default()
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn publish(&self, subject: &str, body: &str) -> Result<(), EtlError> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() <= self.failures {
                return Err(EtlError::Notification {
                    attempts: 1,
                    reason: "topic unavailable".to_string(),
                });
            }
            self.sent
                .borrow_mut()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, error::Error, path::Path, time::Duration};

    use super::testing::RecordingNotifier;
    use super::*;

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_wait: Duration::ZERO,
        }
    }

    #[test]
    fn payload_shape() {
        let notifier = MailtrapNotifier::new(
            "etl@example.com".into(),
            "ops@example.com".into(),
            "key".into(),
        );
        let payload = notifier.payload("Subject", "Body");
        assert_eq!(payload["from"]["email"], "etl@example.com");
        assert_eq!(payload["to"][0]["email"], "ops@example.com");
        assert_eq!(payload["subject"], "Subject");
        assert_eq!(payload["text"], "Body");
    }

    #[test]
    fn retry_until_delivered() -> Result<(), Box<dyn Error>> {
        let notifier = RecordingNotifier::failing(2);
        notify_with_retry(&notifier, "s", "b", no_wait(4))?;
        assert_eq!(notifier.calls.get(), 3);
        assert_eq!(notifier.sent.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn retry_gives_up() {
        let notifier = RecordingNotifier::failing(10);
        match notify_with_retry(&notifier, "s", "b", no_wait(3)) {
            Err(EtlError::Notification { attempts, reason }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "topic unavailable");
            }
            _ => panic!("expected a notification error"),
        }
        assert_eq!(notifier.calls.get(), 3);
    }

    #[ignore]
    #[test]
    fn email_test() -> Result<(), Box<dyn Error>> {
        dotenvy::from_path(Path::new(".env/test.env"))?;
        let notifier = MailtrapNotifier::new(
            env::var("EMAIL_FROM")?,
            env::var("COVID_NOTIFY_TOPIC")?,
            env::var("MAILTRAP_API_KEY")?,
        );
        notifier.publish("Covid ETL test", "This is a test notification.")?;
        Ok(())
    }
}
