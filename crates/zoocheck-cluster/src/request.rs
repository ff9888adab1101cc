//! Requests sent through a service client and their completions.

use bytes::Bytes;

/// Connectivity of a client as reported by the client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Session established with a server that is part of a quorum.
    Connected,
    /// Looking for a server.
    Connecting,
    /// Closed by the harness.
    Closed,
}

/// An operation a client can submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Reads the data of `path`.
    Read { path: String },

    /// Atomically writes `value` to `write_path` iff `read_path` holds
    /// `expected`.
    CompareAndWrite {
        read_path: String,
        expected: Bytes,
        write_path: String,
        value: Bytes,
    },

    /// Writes `value` to `path`.
    Write { path: String, value: Bytes },

    /// Writes every pair atomically. With `create`, all paths must be new.
    MultiWrite {
        writes: Vec<(String, Bytes)>,
        create: bool,
    },
}

impl Operation {
    /// Encodes an integer the way the harness stores values.
    pub fn encode(value: i64) -> Bytes {
        Bytes::from(value.to_string())
    }

    /// The request that creates every key with value `0`.
    pub fn create_keys(keys: &[String]) -> Self {
        Operation::MultiWrite {
            writes: keys
                .iter()
                .map(|key| (key.clone(), Operation::encode(0)))
                .collect(),
            create: true,
        }
    }
}

/// Result code of a completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// A compare-and-write found a different value and wrote nothing.
    ConditionFailed,
    NoNode,
    NodeExists,
    ConnectionLoss,
    SessionExpired,
    OperationTimeout,
}

/// Completion delivered for one submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Status,
    /// Data returned by reads.
    pub data: Option<Bytes>,
}

/// What a completion says about the server-side effect of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The operation took effect (for a compare-and-write, possibly as a no-op).
    Executed,
    /// The effect is unknown.
    Ambiguous,
    /// The operation was rejected without effect.
    NotExecuted,
}

impl Completion {
    pub fn ok(data: Option<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            data,
        }
    }

    pub fn failed(status: Status) -> Self {
        Self { status, data: None }
    }

    /// Classifies the completion.
    pub fn outcome(&self) -> RequestOutcome {
        match self.status {
            Status::Ok | Status::ConditionFailed => RequestOutcome::Executed,
            Status::ConnectionLoss | Status::SessionExpired | Status::OperationTimeout => {
                RequestOutcome::Ambiguous
            }
            Status::NoNode | Status::NodeExists => RequestOutcome::NotExecuted,
        }
    }
}
