use thiserror::Error;

/// All failure modes surfaced by the meek client core.
///
/// Every variant is logged through `EventLog` at the call site before it
/// propagates; nothing in this crate writes to stderr/stdout directly.
#[derive(Debug, Error)]
pub enum MeekError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("cookie construction failed: {0}")]
    Cookie(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("socket protect hook rejected the connection")]
    ProtectRejected,

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("local io error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("relay returned status {0}")]
    BadStatus(u16),

    #[error("session expired (no successful exchange for too long)")]
    SessionExpired,

    #[error("client is already running")]
    AlreadyRunning,
}

pub type MeekResult<T> = Result<T, MeekError>;
