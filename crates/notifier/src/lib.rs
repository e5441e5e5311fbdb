//! Notification dispatch: emails every attendee the content of one
//! notification and records completion on the notification row.
//!
//! - `store` — scoped database session (one transaction per dispatch)
//! - `delivery` — pluggable email senders (SendGrid API, log-only)
//! - `dispatcher` — the dispatch workflow itself

pub mod delivery;
pub mod dispatcher;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod store;

pub use dispatcher::NotificationDispatcher;
pub use error::{DeliveryError, DispatchError};
