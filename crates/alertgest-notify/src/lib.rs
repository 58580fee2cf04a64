//! Chat delivery for finished digests.
//!
//! A [`ChatChannel`] posts one rendered digest to an external chat service
//! and reports the outcome precisely enough to tell "definitely not
//! delivered" ([`ChatError::Rejected`], [`ChatError::NotSent`]) apart from
//! "may have been delivered" ([`ChatError::Ambiguous`]). Channels never retry
//! internally; the caller owns the retry policy.

pub mod channels;
pub mod digest_template;
pub mod error;
pub mod utils;


use async_trait::async_trait;

pub use channels::teams::TeamsChannel;
pub use digest_template::{DigestRenderer, NO_NOTABLE_ALERTS};
pub use error::ChatError;

/// One message ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub title: String,
    /// Markdown body.
    pub text: String,
}

/// Returned by the chat service on a confirmed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    pub http_status: u16,
}

/// A chat delivery channel (e.g. a Teams incoming webhook).
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Posts the message exactly once.
    ///
    /// # Errors
    ///
    /// [`ChatError::Ambiguous`] means the request may have reached the
    /// service; callers must not resend it automatically.
    async fn send(&self, message: &ChatMessage) -> Result<SendReceipt, ChatError>;

    /// Returns the channel type name (e.g. `"teams"`).
    fn channel_name(&self) -> &str;
}
