//! gRPC status codes and the status decoder.

use std::fmt;

use bytes::Bytes;
use prost::Message;
use prost_types::Any;

use super::details::{DetailRegistry, ErrorDetail, RpcStatus};
use crate::targets;

/// gRPC status codes.
///
/// Numbering follows `google.rpc.Code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Not an error.
    Ok = 0,
    /// Cancelled by the caller or because the channel closed.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The request was malformed regardless of server state.
    InvalidArgument = 3,
    /// The deadline passed first.
    DeadlineExceeded = 4,
    /// The named entity does not exist.
    NotFound = 5,
    /// The entity to create is already there.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// A quota or rate limit ran out.
    ResourceExhausted = 8,
    /// Precondition failed.
    FailedPrecondition = 9,
    /// Aborted by a concurrency conflict.
    Aborted = 10,
    /// Past the valid range.
    OutOfRange = 11,
    /// The server does not implement the method.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Transient; the call may be retried.
    Unavailable = 14,
    /// Data loss occurred.
    DataLoss = 15,
    /// No valid credentials.
    Unauthenticated = 16,
}

impl StatusCode {
    /// Create from an i32 code. Values outside the fixed set map to `Unknown`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Wire value.
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    /// Check if this is an OK status.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The canonical name, as printed by other gRPC implementations.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "Canceled",
            Self::Unknown => "Unknown",
            Self::InvalidArgument => "InvalidArgument",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::PermissionDenied => "PermissionDenied",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Aborted => "Aborted",
            Self::OutOfRange => "OutOfRange",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
            Self::DataLoss => "DataLoss",
            Self::Unauthenticated => "Unauthenticated",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<tonic::Code> for StatusCode {
    fn from(code: tonic::Code) -> Self {
        Self::from_i32(code as i32)
    }
}

impl From<StatusCode> for tonic::Code {
    fn from(code: StatusCode) -> Self {
        tonic::Code::from_i32(code.to_i32())
    }
}

/// A remote-reported call outcome: code, message and typed details.
///
/// `details` holds every payload the decoder recognised, in the order the
/// server sent them. Payloads of unregistered types, and registered payloads
/// that failed to decode, are kept raw in `unparsed`.
#[derive(Debug, Clone)]
pub struct Status {
    /// The status code.
    pub code: StatusCode,
    /// Human-readable message, verbatim from the server.
    pub message: String,
    /// Decoded detail payloads.
    pub details: Vec<ErrorDetail>,
    /// Detail payloads that could not be interpreted.
    pub unparsed: Vec<Any>,
}

impl Status {
    /// Create a new status without details.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            unparsed: Vec::new(),
        }
    }

    /// `Cancelled` with `message`.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    /// Create a deadline exceeded status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    /// `InvalidArgument` with `message`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    /// `NotFound` with `message`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    /// `Internal` with `message`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// `Unavailable` with `message`.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    /// Create an unimplemented status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    /// Append a detail payload.
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Append a raw payload that will be carried without interpretation.
    pub fn with_unparsed(mut self, any: Any) -> Self {
        self.unparsed.push(any);
        self
    }

    /// Check if this is an OK status.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// First detail of the given kind, if any.
    pub fn find_detail<T>(&self, pick: impl Fn(&ErrorDetail) -> Option<&T>) -> Option<&T> {
        self.details.iter().find_map(pick)
    }

    /// Encode details into the `google.rpc.Status` wire form.
    ///
    /// Known, custom and unparsed payloads are all carried. Returns empty
    /// bytes when there is nothing to carry.
    pub fn encode_details(&self) -> Bytes {
        if self.details.is_empty() && self.unparsed.is_empty() {
            return Bytes::new();
        }
        let envelope = RpcStatus {
            code: self.code.to_i32(),
            message: self.message.clone(),
            details: self
                .details
                .iter()
                .map(ErrorDetail::to_any)
                .chain(self.unparsed.iter().cloned())
                .collect(),
        };
        Bytes::from(envelope.encode_to_vec())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.details.is_empty() {
            write!(f, " [")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail)?;
            }
            write!(f, "]")?;
        }
        if !self.unparsed.is_empty() {
            write!(f, " (+{} undecoded detail(s))", self.unparsed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        StatusDecoder::default().decode(&status)
    }
}

impl From<Status> for tonic::Status {
    fn from(status: Status) -> Self {
        let details = status.encode_details();
        if details.is_empty() {
            tonic::Status::new(status.code.into(), status.message)
        } else {
            tonic::Status::with_details(status.code.into(), status.message, details)
        }
    }
}

/// Turns protocol-level failures into [`Status`] values.
///
/// Decoding never fails. A detail blob that is not a `google.rpc.Status`
/// yields no details; individual payloads that cannot be decoded are moved to
/// [`Status::unparsed`] without affecting the others.
#[derive(Debug, Clone, Default)]
pub struct StatusDecoder {
    registry: DetailRegistry,
}

impl StatusDecoder {
    /// Create a decoder over a custom registry.
    pub fn new(registry: DetailRegistry) -> Self {
        Self { registry }
    }

    /// The registry consulted for detail payloads.
    pub fn registry(&self) -> &DetailRegistry {
        &self.registry
    }

    /// Decode a raw failure.
    pub fn decode(&self, raw: &tonic::Status) -> Status {
        let mut status = Status::new(StatusCode::from(raw.code()), raw.message());

        let blob = raw.details();
        if blob.is_empty() {
            return status;
        }

        let envelope = match RpcStatus::decode(blob) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    target: targets::STATUS,
                    "Ignoring status details that are not a google.rpc.Status: {}",
                    e
                );
                return status;
            }
        };

        for any in envelope.details {
            match self.registry.decode(&any) {
                Some(Ok(detail)) => status.details.push(detail),
                Some(Err(e)) => {
                    tracing::warn!(
                        target: targets::STATUS,
                        "Dropping malformed {} detail: {}",
                        any.type_url,
                        e
                    );
                    status.unparsed.push(any);
                }
                None => {
                    tracing::debug!(
                        target: targets::STATUS,
                        "Skipping unregistered detail type {}",
                        any.type_url
                    );
                    status.unparsed.push(any);
                }
            }
        }

        status
    }
}
