//! Scheduler-level errors
//!
//! Flow and effect failures never show up here; they are recorded as error
//! values in the snapshot instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("malformed job: {0}")]
    MalformedJob(String),

    #[error("no open requirement `{requirement_id}` for key `{key}`")]
    UnknownRequirement { key: String, requirement_id: String },

    #[error("mailbox for key `{0}` is closed")]
    MailboxClosed(String),

    #[error("host is shutting down")]
    ShuttingDown,

    #[error("world store failed: {0}")]
    Store(String),
}
