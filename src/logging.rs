//! Diagnostic output: the core never writes to a global stream directly,
//! it hands every message to an injected `EventLog`.
//!
//! [`TracingEventLog`] is the default implementation and forwards to the
//! `log` crate/`env_logger`, so a binary that never supplies its own
//! `EventLog` still gets ordinary structured logging.

use std::fmt;
use std::sync::Arc;

/// How sensitive a logged value is. Mirrors the Android `meek` transport's
/// `sensitivity` parameter: callers embedding this crate in a UI can choose
/// to redact `Sensitive` fields (e.g. the target address) from persisted
/// logs while still surfacing `NotSensitive` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    NotSensitive,
    Sensitive,
}

/// Host collaborator that absorbs all diagnostic output from the core.
pub trait EventLog: Send + Sync {
    fn log(&self, message_id: &str, sensitivity: Sensitivity, message: &dyn fmt::Display);
}

pub type SharedEventLog = Arc<dyn EventLog>;

/// Default `EventLog` that forwards to the `log` crate at a level derived
/// from the message id's conventional suffix (`.error`, `.warn`, ...),
/// falling back to `info`.
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, message_id: &str, sensitivity: Sensitivity, message: &dyn fmt::Display) {
        let redacted;
        let message: &dyn fmt::Display = match sensitivity {
            Sensitivity::NotSensitive => message,
            Sensitivity::Sensitive => {
                redacted = "<redacted>";
                &redacted
            }
        };
        if message_id.ends_with(".error") {
            log::error!("[{message_id}] {message}");
        } else if message_id.ends_with(".warn") {
            log::warn!("[{message_id}] {message}");
        } else if message_id.ends_with(".debug") {
            log::debug!("[{message_id}] {message}");
        } else {
            log::info!("[{message_id}] {message}");
        }
    }
}
