//! Structured error details carried alongside a gRPC status.
//!
//! Servers attach details by packing a `google.rpc.Status` message into the
//! `grpc-status-details-bin` trailer. Its `details` field is a list of
//! `google.protobuf.Any`, each naming its own type. A [`DetailRegistry`] maps
//! those type names to decoders; anything it does not know is left for the
//! caller to inspect raw.

use std::any::Any as StdAny;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use prost_types::Any;

/// Prefix used by protobuf when packing an `Any`.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// `google.rpc.Status`, the envelope for encoded details.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

/// `google.rpc.ErrorInfo`
#[derive(Clone, PartialEq, Message)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    pub reason: String,
    #[prost(string, tag = "2")]
    pub domain: String,
    #[prost(map = "string, string", tag = "3")]
    pub metadata: HashMap<String, String>,
}

/// `google.rpc.RetryInfo`
#[derive(Clone, PartialEq, Message)]
pub struct RetryInfo {
    #[prost(message, optional, tag = "1")]
    pub retry_delay: Option<prost_types::Duration>,
}

impl RetryInfo {
    /// The suggested delay, if present and non-negative.
    pub fn delay(&self) -> Option<Duration> {
        self.retry_delay
            .and_then(|d| Duration::try_from(d).ok())
    }
}

/// `google.rpc.DebugInfo`
#[derive(Clone, PartialEq, Message)]
pub struct DebugInfo {
    #[prost(string, repeated, tag = "1")]
    pub stack_entries: Vec<String>,
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// `google.rpc.QuotaFailure`
#[derive(Clone, PartialEq, Message)]
pub struct QuotaFailure {
    #[prost(message, repeated, tag = "1")]
    pub violations: Vec<QuotaViolation>,
}

/// `google.rpc.QuotaFailure.Violation`
#[derive(Clone, PartialEq, Message)]
pub struct QuotaViolation {
    #[prost(string, tag = "1")]
    pub subject: String,
    #[prost(string, tag = "2")]
    pub description: String,
}

/// `google.rpc.PreconditionFailure`
#[derive(Clone, PartialEq, Message)]
pub struct PreconditionFailure {
    #[prost(message, repeated, tag = "1")]
    pub violations: Vec<PreconditionViolation>,
}

/// `google.rpc.PreconditionFailure.Violation`
#[derive(Clone, PartialEq, Message)]
pub struct PreconditionViolation {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub subject: String,
    #[prost(string, tag = "3")]
    pub description: String,
}

/// `google.rpc.BadRequest`
#[derive(Clone, PartialEq, Message)]
pub struct BadRequest {
    #[prost(message, repeated, tag = "1")]
    pub field_violations: Vec<FieldViolation>,
}

/// `google.rpc.BadRequest.FieldViolation`
#[derive(Clone, PartialEq, Message)]
pub struct FieldViolation {
    #[prost(string, tag = "1")]
    pub field: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub reason: String,
}

/// `google.rpc.RequestInfo`
#[derive(Clone, PartialEq, Message)]
pub struct RequestInfo {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub serving_data: String,
}

/// `google.rpc.ResourceInfo`
#[derive(Clone, PartialEq, Message)]
pub struct ResourceInfo {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(string, tag = "2")]
    pub resource_name: String,
    #[prost(string, tag = "3")]
    pub owner: String,
    #[prost(string, tag = "4")]
    pub description: String,
}

/// `google.rpc.Help`
#[derive(Clone, PartialEq, Message)]
pub struct Help {
    #[prost(message, repeated, tag = "1")]
    pub links: Vec<HelpLink>,
}

/// `google.rpc.Help.Link`
#[derive(Clone, PartialEq, Message)]
pub struct HelpLink {
    #[prost(string, tag = "1")]
    pub description: String,
    #[prost(string, tag = "2")]
    pub url: String,
}

/// `google.rpc.LocalizedMessage`
#[derive(Clone, PartialEq, Message)]
pub struct LocalizedMessage {
    #[prost(string, tag = "1")]
    pub locale: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// A detail payload of a type registered by the application.
#[derive(Clone)]
pub struct CustomDetail {
    type_name: String,
    raw: Vec<u8>,
    value: Arc<dyn StdAny + Send + Sync>,
    rendered: String,
}

impl CustomDetail {
    /// Fully-qualified protobuf type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The encoded message bytes as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Borrow the decoded message as `M`, if that is its type.
    pub fn downcast_ref<M: 'static>(&self) -> Option<&M> {
        self.value.downcast_ref::<M>()
    }
}

impl fmt::Debug for CustomDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDetail")
            .field("type_name", &self.type_name)
            .field("value", &self.rendered)
            .finish()
    }
}

/// One decoded detail payload.
#[derive(Debug, Clone)]
pub enum ErrorDetail {
    ErrorInfo(ErrorInfo),
    RetryInfo(RetryInfo),
    DebugInfo(DebugInfo),
    QuotaFailure(QuotaFailure),
    PreconditionFailure(PreconditionFailure),
    BadRequest(BadRequest),
    RequestInfo(RequestInfo),
    ResourceInfo(ResourceInfo),
    Help(Help),
    LocalizedMessage(LocalizedMessage),
    /// A kind registered with [`DetailRegistry::register`].
    Custom(CustomDetail),
}

impl ErrorDetail {
    /// Fully-qualified protobuf type name of this detail.
    pub fn type_name(&self) -> &str {
        match self {
            Self::ErrorInfo(_) => "google.rpc.ErrorInfo",
            Self::RetryInfo(_) => "google.rpc.RetryInfo",
            Self::DebugInfo(_) => "google.rpc.DebugInfo",
            Self::QuotaFailure(_) => "google.rpc.QuotaFailure",
            Self::PreconditionFailure(_) => "google.rpc.PreconditionFailure",
            Self::BadRequest(_) => "google.rpc.BadRequest",
            Self::RequestInfo(_) => "google.rpc.RequestInfo",
            Self::ResourceInfo(_) => "google.rpc.ResourceInfo",
            Self::Help(_) => "google.rpc.Help",
            Self::LocalizedMessage(_) => "google.rpc.LocalizedMessage",
            Self::Custom(custom) => custom.type_name(),
        }
    }

    /// Pack this detail back into an `Any`.
    pub fn to_any(&self) -> Any {
        let value = match self {
            Self::ErrorInfo(m) => m.encode_to_vec(),
            Self::RetryInfo(m) => m.encode_to_vec(),
            Self::DebugInfo(m) => m.encode_to_vec(),
            Self::QuotaFailure(m) => m.encode_to_vec(),
            Self::PreconditionFailure(m) => m.encode_to_vec(),
            Self::BadRequest(m) => m.encode_to_vec(),
            Self::RequestInfo(m) => m.encode_to_vec(),
            Self::ResourceInfo(m) => m.encode_to_vec(),
            Self::Help(m) => m.encode_to_vec(),
            Self::LocalizedMessage(m) => m.encode_to_vec(),
            Self::Custom(custom) => custom.raw.clone(),
        };
        Any {
            type_url: format!("{}{}", TYPE_URL_PREFIX, self.type_name()),
            value,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorInfo(info) => {
                write!(f, "ErrorInfo{{reason: {}, domain: {}", info.reason, info.domain)?;
                let mut keys: Vec<_> = info.metadata.iter().collect();
                keys.sort();
                for (key, value) in keys {
                    write!(f, ", {}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Self::RetryInfo(info) => match info.delay() {
                Some(delay) => write!(f, "RetryInfo{{retry_delay: {:?}}}", delay),
                None => write!(f, "RetryInfo{{}}"),
            },
            Self::DebugInfo(info) => write!(
                f,
                "DebugInfo{{detail: {}, stack_entries: {}}}",
                info.detail,
                info.stack_entries.len()
            ),
            Self::QuotaFailure(failure) => {
                write!(f, "QuotaFailure[")?;
                for (i, v) in failure.violations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", v.subject, v.description)?;
                }
                write!(f, "]")
            }
            Self::PreconditionFailure(failure) => {
                write!(f, "PreconditionFailure[")?;
                for (i, v) in failure.violations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}/{}: {}", v.r#type, v.subject, v.description)?;
                }
                write!(f, "]")
            }
            Self::BadRequest(request) => {
                write!(f, "BadRequest[")?;
                for (i, v) in request.field_violations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", v.field, v.description)?;
                }
                write!(f, "]")
            }
            Self::RequestInfo(info) => write!(
                f,
                "RequestInfo{{request_id: {}, serving_data: {}}}",
                info.request_id, info.serving_data
            ),
            Self::ResourceInfo(info) => write!(
                f,
                "ResourceInfo{{type: {}, name: {}, owner: {}, description: {}}}",
                info.resource_type, info.resource_name, info.owner, info.description
            ),
            Self::Help(help) => {
                write!(f, "Help[")?;
                for (i, link) in help.links.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} <{}>", link.description, link.url)?;
                }
                write!(f, "]")
            }
            Self::LocalizedMessage(msg) => {
                write!(f, "LocalizedMessage{{{}: {}}}", msg.locale, msg.message)
            }
            Self::Custom(custom) => write!(f, "{}{}", custom.type_name, custom.rendered),
        }
    }
}

type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<ErrorDetail, prost::DecodeError> + Send + Sync>;

/// Decoders for detail payloads, keyed by fully-qualified type name.
///
/// [`DetailRegistry::default`] knows the standard `google.rpc` detail set.
#[derive(Clone)]
pub struct DetailRegistry {
    decoders: Arc<HashMap<String, DecodeFn>>,
}

impl fmt::Debug for DetailRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("DetailRegistry").field("types", &names).finish()
    }
}

impl Default for DetailRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.insert::<ErrorInfo>("google.rpc.ErrorInfo", ErrorDetail::ErrorInfo);
        registry.insert::<RetryInfo>("google.rpc.RetryInfo", ErrorDetail::RetryInfo);
        registry.insert::<DebugInfo>("google.rpc.DebugInfo", ErrorDetail::DebugInfo);
        registry.insert::<QuotaFailure>("google.rpc.QuotaFailure", ErrorDetail::QuotaFailure);
        registry.insert::<PreconditionFailure>(
            "google.rpc.PreconditionFailure",
            ErrorDetail::PreconditionFailure,
        );
        registry.insert::<BadRequest>("google.rpc.BadRequest", ErrorDetail::BadRequest);
        registry.insert::<RequestInfo>("google.rpc.RequestInfo", ErrorDetail::RequestInfo);
        registry.insert::<ResourceInfo>("google.rpc.ResourceInfo", ErrorDetail::ResourceInfo);
        registry.insert::<Help>("google.rpc.Help", ErrorDetail::Help);
        registry.insert::<LocalizedMessage>(
            "google.rpc.LocalizedMessage",
            ErrorDetail::LocalizedMessage,
        );
        registry
    }
}

impl DetailRegistry {
    /// A registry that recognises nothing.
    pub fn empty() -> Self {
        Self {
            decoders: Arc::new(HashMap::new()),
        }
    }

    /// Register an application-defined detail message.
    ///
    /// Decoded values surface as [`ErrorDetail::Custom`].
    pub fn register<M>(mut self, type_name: impl Into<String>) -> Self
    where
        M: Message + Default + fmt::Debug + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        let name = type_name.clone();
        Arc::make_mut(&mut self.decoders).insert(
            type_name,
            Arc::new(move |bytes: &[u8]| {
                let message = M::decode(bytes)?;
                Ok(ErrorDetail::Custom(CustomDetail {
                    type_name: name.clone(),
                    raw: bytes.to_vec(),
                    rendered: format!("{:?}", message),
                    value: Arc::new(message),
                }))
            }),
        );
        self
    }

    fn insert<M>(&mut self, type_name: &str, wrap: fn(M) -> ErrorDetail)
    where
        M: Message + Default + 'static,
    {
        Arc::make_mut(&mut self.decoders).insert(
            type_name.to_string(),
            Arc::new(move |bytes: &[u8]| M::decode(bytes).map(wrap)),
        );
    }

    /// True if `type_name` has a decoder.
    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    /// Decode one packed detail.
    ///
    /// Returns `None` for unregistered types, `Some(Err)` when the type is
    /// known but the bytes do not decode.
    pub fn decode(&self, any: &Any) -> Option<Result<ErrorDetail, prost::DecodeError>> {
        let decoder = self.decoders.get(type_name_of(&any.type_url))?;
        Some(decoder(&any.value))
    }
}

/// The type name part of a type URL: everything after the last `/`.
pub fn type_name_of(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}
