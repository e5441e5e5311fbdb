use thiserror::Error;

/// Why a single email could not be handed to the delivery backend.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email API rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Why a dispatch did not complete.
///
/// The session is always released before one of these reaches the caller,
/// and the notification row is never updated on any error path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Notification {0} not found")]
    NotFound(i32),

    #[error("Datastore error: {0}")]
    Datastore(#[from] sqlx::Error),

    #[error("Delivery to {recipient} failed after {delivered} of {total} emails: {source}")]
    Delivery {
        recipient: String,
        delivered: usize,
        total: usize,
        #[source]
        source: DeliveryError,
    },
}

impl DispatchError {
    /// Whether redelivering the trigger message could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::NotFound(_) => false,
            DispatchError::Datastore(_) => true,
            DispatchError::Delivery { source, .. } => source.is_transient(),
        }
    }
}

impl DeliveryError {
    /// Throttling, server errors and transport failures may clear up. Other
    /// 4xx responses mean the request itself is wrong.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Http(_) => true,
            DeliveryError::Rejected { status, .. } => {
                *status == 429 || !(400..500).contains(status)
            }
            DeliveryError::InvalidMessage(_) => false,
        }
    }
}
