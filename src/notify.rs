use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::model::{minutes_to_hhmm, Minutes};

/// Everything a notification message needs, snapshotted at dispatch time so
/// rendering never goes back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDigest {
    pub booking_id: Ulid,
    pub business_name: String,
    pub service_name: String,
    pub client_name: String,
    pub client_email: String,
    pub date: NaiveDate,
    pub start: Minutes,
    pub duration: Minutes,
    pub total_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Confirmation to the client, right after commit.
    Confirmation(BookingDigest),
    /// New-booking alert to the business owner.
    OwnerAlert(BookingDigest),
    /// Next-day reminder to the client.
    Reminder(BookingDigest),
}

impl Notification {
    pub fn digest(&self) -> &BookingDigest {
        match self {
            Notification::Confirmation(d)
            | Notification::OwnerAlert(d)
            | Notification::Reminder(d) => d,
        }
    }

    pub fn booking_id(&self) -> Ulid {
        self.digest().booking_id
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::Confirmation(d) => {
                format!("Confirmation de réservation - {}", d.business_name)
            }
            Notification::OwnerAlert(d) => {
                format!("Nouvelle réservation - {}", d.client_name)
            }
            Notification::Reminder(d) => {
                format!("Rappel : votre rendez-vous demain - {}", d.business_name)
            }
        }
    }
}

#[derive(Debug)]
pub enum NotifyError {
    Send(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Send(msg) => write!(f, "send failed: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Outbound message sink. The production deployment points this at the
/// hosted mail provider; here a logging implementation stands in.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Renders each notification into the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let d = notification.digest();
        tracing::info!(
            booking = %d.booking_id,
            to = %d.client_email,
            subject = %notification.subject(),
            date = %d.date,
            time = %minutes_to_hhmm(d.start),
            "notification"
        );
        Ok(())
    }
}

/// Fire-and-forget notification dispatch.
///
/// The booking is the durable fact; notifications are advisory. Each
/// dispatch runs on its own task outside the commit's critical path, and a
/// failed send is logged and counted, never propagated to the booking
/// caller.
pub struct Dispatcher {
    mailer: Arc<dyn Mailer>,
}

impl Dispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            match mailer.send(&notification).await {
                Ok(()) => {
                    metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL)
                        .increment(1);
                }
                Err(e) => {
                    tracing::warn!(
                        booking = %notification.booking_id(),
                        "notification failed: {e}"
                    );
                    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL)
                        .increment(1);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    fn digest() -> BookingDigest {
        BookingDigest {
            booking_id: Ulid::new(),
            business_name: "Brille & Net".into(),
            service_name: "Ménage complet".into(),
            client_name: "Jean Dupont".into(),
            client_email: "jean@exemple.fr".into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 17).unwrap(),
            start: 600,
            duration: 60,
            total_price_cents: 6500,
        }
    }

    struct RecordingMailer {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Send("smtp unreachable".into()))
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_off_the_caller_path() {
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(mailer.clone());

        dispatcher
            .dispatch(Notification::Confirmation(digest()))
            .await
            .unwrap();
        dispatcher
            .dispatch(Notification::OwnerAlert(digest()))
            .await
            .unwrap();

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Notification::Confirmation(_)));
        assert!(matches!(sent[1], Notification::OwnerAlert(_)));
    }

    #[tokio::test]
    async fn failed_send_is_swallowed() {
        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        // The task must complete cleanly; the error stays inside it.
        dispatcher
            .dispatch(Notification::Reminder(digest()))
            .await
            .unwrap();
    }

    #[test]
    fn subjects_name_the_right_party() {
        let d = digest();
        assert!(Notification::Confirmation(d.clone())
            .subject()
            .contains("Brille & Net"));
        assert!(Notification::OwnerAlert(d.clone())
            .subject()
            .contains("Jean Dupont"));
        assert!(Notification::Reminder(d).subject().contains("demain"));
    }
}
