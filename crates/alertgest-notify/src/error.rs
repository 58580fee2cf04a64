/// Outcome of a chat send that did not succeed.
///
/// # Examples
///
/// ```rust
/// use alertgest_notify::ChatError;
///
/// let err = ChatError::Rejected { status: 400, body: "bad card".to_string() };
/// assert!(!err.is_ambiguous());
/// assert!(err.to_string().contains("400"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The service answered with a non-success status.
    #[error("Chat: rejected with status={status}, body={body}")]
    Rejected { status: u16, body: String },

    /// The request never left this process (connection refused, DNS, bad URL).
    #[error("Chat: request not sent: {0}")]
    NotSent(String),

    /// The request may have been delivered (timeout, connection lost after
    /// the request was written).
    #[error("Chat: delivery outcome unknown: {0}")]
    Ambiguous(String),

    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Chat: invalid channel configuration: {0}")]
    InvalidConfig(String),
}

impl ChatError {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ChatError::Ambiguous(_))
    }

    /// Sorts a transport error by whether the request could have reached the
    /// service.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() || err.is_connect() {
            ChatError::NotSent(err.to_string())
        } else {
            ChatError::Ambiguous(err.to_string())
        }
    }
}
