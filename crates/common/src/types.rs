use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification pending distribution to attendees.
///
/// Rows are created by the conference admin site; the worker only ever
/// writes `completed_date` and `status`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Notification {
    pub id: i32,
    pub status: Option<String>,
    pub message: String,
    pub subject: String,
    pub submitted_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
}

/// The content fetched by id at the start of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationContent {
    pub message: String,
    pub subject: String,
}

/// A conference attendee who receives notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendee {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Attendee {
    /// Personalized plain-text body for this attendee.
    pub fn greeting(&self, message: &str) -> String {
        format!("Hello {} {},\n{}", self.first_name, self.last_name, message)
    }
}

/// Status written to a notification after every attendee has been emailed.
pub fn completion_status(attendees_notified: usize) -> String {
    format!("Notified {} attendees", attendees_notified)
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub notification_id: i32,
    pub attendees_notified: usize,
    pub status: String,
    pub completed_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_format() {
        let attendee = Attendee {
            email: "a@x.com".to_string(),
            first_name: "A".to_string(),
            last_name: "One".to_string(),
        };
        assert_eq!(attendee.greeting("Welcome"), "Hello A One,\nWelcome");
    }

    #[test]
    fn test_greeting_keeps_multiline_message() {
        let attendee = Attendee {
            email: "b@x.com".to_string(),
            first_name: "B".to_string(),
            last_name: "Two".to_string(),
        };
        assert_eq!(
            attendee.greeting("Line one\nLine two"),
            "Hello B Two,\nLine one\nLine two"
        );
    }

    #[test]
    fn test_completion_status() {
        assert_eq!(completion_status(0), "Notified 0 attendees");
        assert_eq!(completion_status(2), "Notified 2 attendees");
    }
}
