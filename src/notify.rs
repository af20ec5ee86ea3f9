use async_trait::async_trait;
use indoc::formatdoc;
use tracing::info;

use crate::models::UserId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub from: UserId,
    pub to: UserId,
    pub subject: String,
    pub body: String,
}

/// Delivers messages to users.
///
/// Sending is fire-and-forget: implementations deal with their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification);
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: Notification) {
        info!(
            from = ?notification.from,
            to = ?notification.to,
            "{}\n{}",
            notification.subject,
            notification.body
        );
    }
}

pub struct OfferAccepted<'a> {
    pub accepter_name: &'a str,
    pub course_name: &'a str,
    pub exchange_name: &'a str,
    pub group_from: &'a str,
    pub group_to: &'a str,
}

impl OfferAccepted<'_> {
    pub fn into_notification(self, from: UserId, to: UserId) -> Notification {
        let subject = format!(
            "{}: {}: Your group exchange offer was accepted",
            self.course_name, self.exchange_name
        );

        let body = formatdoc! {
            r#"
                Your group exchange offer in '{exchange}' (course: '{course}') was accepted by {user}.

                You were moved from group '{group_from}' to group '{group_to}'.
            "#,
            exchange = self.exchange_name,
            course = self.course_name,
            user = self.accepter_name,
            group_from = self.group_from,
            group_to = self.group_to,
        };

        Notification {
            from,
            to,
            subject,
            body,
        }
    }
}
