use thiserror::Error;

use crate::record::Operation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure taxonomy for the consistency layer.
///
/// Stale writes are deliberately not represented here: a merge discarded by
/// the version comparison is logged and dropped, never surfaced as a failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("record `{table}/{id}` not found")]
    NotFound { table: String, id: String },
    #[error("transaction rejected by remote authority: {message}")]
    TransactionRejected {
        message: String,
        operations: Vec<Operation>,
    },
    #[error("unsupported operation command `{command}` in local application")]
    UnsupportedOperation { command: String },
    #[error("transport failure after {attempts} attempts: {message}")]
    Transport { message: String, attempts: u32 },
    #[error("request rejected with status {status}: {message}")]
    RequestRejected { status: u16, message: String },
    #[error("change monitor fault: {message}")]
    MonitorFault { message: String },
    #[error("cache persistence failed: {message}")]
    Persistence { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn transaction_rejected(message: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self::TransactionRejected {
            message: message.into(),
            operations,
        }
    }

    pub fn unsupported_operation(command: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            command: command.into(),
        }
    }

    pub fn transport(message: impl Into<String>, attempts: u32) -> Self {
        Self::Transport {
            message: message.into(),
            attempts,
        }
    }

    pub fn request_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::RequestRejected {
            status,
            message: message.into(),
        }
    }

    pub fn monitor_fault(message: impl Into<String>) -> Self {
        Self::MonitorFault {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a background poll cycle may survive this error.
    ///
    /// Exhausted transport retries are transient (the next cycle may reach
    /// the authority again); everything else, notably a 4xx rejection such as
    /// an expired credential, stops the monitor.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_transient_for_the_monitor() {
        assert!(Error::transport("connection reset", 5).is_transient());
        assert!(!Error::request_rejected(401, "token expired").is_transient());
        assert!(!Error::monitor_fault("poll failed").is_transient());
    }

    #[test]
    fn rejection_carries_the_payload() {
        let ops = vec![Operation::set("block", "b1", Vec::new(), serde_json::json!({}))];
        let err = Error::transaction_rejected("invalid operation", ops);

        let Error::TransactionRejected { operations, .. } = err else {
            panic!("expected TransactionRejected");
        };
        assert_eq!(operations.len(), 1);
    }
}
