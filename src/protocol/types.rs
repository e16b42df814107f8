//! Payload structures as they appear on the wire.
//!
//! Everything here serializes with `serde` into the JSON shape the collector
//! expects. Field names follow the wire format, so `type` becomes `ty` on the
//! Rust side and is mapped back with a rename. Defaulted fields are omitted
//! from the output to keep payloads small.

use std::borrow::Cow;
use std::cmp;
use std::convert::TryFrom;
use std::fmt;
use std::iter::FromIterator;
use std::net::{AddrParseError, IpAddr};
use std::ops;
use std::str;
use std::time::SystemTime;

use serde::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::utils::{ts_rfc3339_opt, ts_seconds_float};

/// Re-exports for untyped JSON values.
pub mod value {
    pub use serde_json::value::{from_value, to_value, Index, Map, Number, Value};
}

/// Re-exports for the ordered map used throughout the payloads.
pub mod map {
    pub use std::collections::btree_map::{BTreeMap as Map, *};
}

/// An untyped JSON value.
pub use self::value::Value;

/// The ordered map used for tags, extras and contexts.
pub use self::map::Map;

/// A list that serializes as `{"values": [...]}`.
///
/// Breadcrumbs and exception chains use this envelope object on the wire
/// rather than a bare array. The wrapper dereferences to a slice so callers
/// can mostly pretend it is a `Vec`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Values<T> {
    /// The wrapped entries.
    pub values: Vec<T>,
}

impl<T> Values<T> {
    /// Creates an empty collection.
    pub fn new() -> Values<T> {
        Values { values: Vec::new() }
    }

    /// Returns `true` when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// Manual impl so that `T: Default` is not required.
impl<T> Default for Values<T> {
    fn default() -> Self {
        Values::new()
    }
}

impl<T> From<Vec<T>> for Values<T> {
    fn from(values: Vec<T>) -> Self {
        Values { values }
    }
}

impl<T> FromIterator<T> for Values<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Vec::<T>::from_iter(iter).into()
    }
}

impl<T> Extend<T> for Values<T> {
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.values.extend(iter)
    }
}

impl<T> AsRef<[T]> for Values<T> {
    fn as_ref(&self) -> &[T] {
        &self.values
    }
}

impl<T> AsMut<Vec<T>> for Values<T> {
    fn as_mut(&mut self) -> &mut Vec<T> {
        &mut self.values
    }
}

impl<T> ops::Deref for Values<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl<T> ops::DerefMut for Values<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.values
    }
}

impl<T> IntoIterator for Values<T> {
    type Item = <Vec<T> as IntoIterator>::Item;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Values<T> {
    type Item = <&'a Vec<T> as IntoIterator>::Item;
    type IntoIter = <&'a Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Values<T> {
    type Item = <&'a mut Vec<T> as IntoIterator>::Item;
    type IntoIter = <&'a mut Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter_mut()
    }
}

/// Returned when a string is not a recognized severity level.
#[derive(Debug, Error)]
#[error("invalid level")]
pub struct ParseLevelError;

/// Severity of an event or breadcrumb.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Verbose diagnostic detail.
    Debug,
    /// Routine information.
    #[default]
    Info,
    /// Something looks off but the application continues.
    Warning,
    /// A handled failure.
    Error,
    /// A failure the application does not recover from.
    Fatal,
}

impl Level {
    /// The lowercase wire name of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }

    /// Returns `true` for [`Level::Info`].
    pub fn is_info(&self) -> bool {
        *self == Level::Info
    }

    /// Returns `true` for [`Level::Error`].
    pub fn is_error(&self) -> bool {
        *self == Level::Error
    }
}

impl str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(string: &str) -> Result<Level, Self::Err> {
        Ok(match string {
            "debug" => Level::Debug,
            // "log" is an alias some producers emit.
            "info" | "log" => Level::Info,
            "warning" => Level::Warning,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => return Err(ParseLevelError),
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_str_serde!(Level, "a severity level");

/// Serde default helpers shared by the payload structs.
mod defaults {
    use super::*;

    pub fn breadcrumb_ty() -> String {
        "default".to_string()
    }

    pub fn is_default_breadcrumb_ty(ty: &str) -> bool {
        ty == "default"
    }

    pub fn breadcrumb_level() -> Level {
        Level::Info
    }

    pub fn event_id() -> Uuid {
        Uuid::new_v4()
    }

    // Event ids travel as 32 hex chars without dashes.
    pub fn serialize_event_id<S: Serializer>(
        uuid: &Uuid,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_some(&uuid.as_simple().to_string())
    }

    pub fn event_level() -> Level {
        Level::Error
    }

    pub fn platform() -> Cow<'static, str> {
        Cow::Borrowed("other")
    }

    pub fn is_default_platform(value: &str) -> bool {
        value == "other"
    }

    static DEFAULT_FINGERPRINT: &[Cow<'static, str>] = &[Cow::Borrowed("{{ default }}")];

    pub fn fingerprint<'a>() -> Cow<'a, [Cow<'a, str>]> {
        Cow::Borrowed(DEFAULT_FINGERPRINT)
    }

    pub fn is_default_fingerprint(fp: &[Cow<'_, str>]) -> bool {
        fp.len() == 1 && (fp[0] == "{{ default }}" || fp[0] == "{{default}}")
    }
}

/// A single entry in the trail of actions leading up to an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    /// When the breadcrumb was recorded.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub timestamp: SystemTime,
    /// The breadcrumb kind, `"default"` unless set otherwise.
    #[serde(
        rename = "type",
        default = "defaults::breadcrumb_ty",
        skip_serializing_if = "defaults::is_default_breadcrumb_ty"
    )]
    pub ty: String,
    /// A dotted category such as `"auth.login"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Severity of the breadcrumb, `Info` unless set otherwise.
    #[serde(
        default = "defaults::breadcrumb_level",
        skip_serializing_if = "Level::is_info"
    )]
    pub level: Level,
    /// Free-form text describing what happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured data attached to the breadcrumb.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Default for Breadcrumb {
    fn default() -> Breadcrumb {
        Breadcrumb {
            timestamp: SystemTime::now(),
            ty: defaults::breadcrumb_ty(),
            category: Default::default(),
            level: defaults::breadcrumb_level(),
            message: Default::default(),
            data: Default::default(),
        }
    }
}

/// A user IP address, either explicit or inferred server side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub enum IpAddress {
    /// Sent as `{{auto}}` so the collector fills in the connection address.
    #[default]
    Auto,
    /// A concrete v4 or v6 address.
    Exact(IpAddr),
}

impl PartialEq<IpAddr> for IpAddress {
    fn eq(&self, other: &IpAddr) -> bool {
        match *self {
            IpAddress::Auto => false,
            IpAddress::Exact(ref addr) => addr == other,
        }
    }
}

impl cmp::PartialOrd<IpAddr> for IpAddress {
    fn partial_cmp(&self, other: &IpAddr) -> Option<cmp::Ordering> {
        match *self {
            IpAddress::Auto => None,
            IpAddress::Exact(ref addr) => addr.partial_cmp(other),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IpAddress::Auto => write!(f, "{{{{auto}}}}"),
            IpAddress::Exact(ref addr) => write!(f, "{addr}"),
        }
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> IpAddress {
        IpAddress::Exact(addr)
    }
}

impl str::FromStr for IpAddress {
    type Err = AddrParseError;

    fn from_str(string: &str) -> Result<IpAddress, AddrParseError> {
        match string {
            "{{auto}}" => Ok(IpAddress::Auto),
            other => other.parse().map(IpAddress::Exact),
        }
    }
}

impl_str_serde!(IpAddress, "an ip address");

/// The user an event happened to.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct User {
    /// A stable application-level identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The user's email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// The address the user connected from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddress>,
    /// A display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Any further attributes, passed through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// The HTTP request being handled when an event happened.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Request {
    /// The full request URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// The request method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// The request body, if it is worth sending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// The raw query string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    /// The raw cookie header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    /// Request headers by name.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, String>,
    /// Server environment data in CGI style.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub env: Map<String, String>,
}

/// How an exception came to be captured.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Mechanism {
    /// Identifier of the capturing mechanism, e.g. `"panic"`.
    #[serde(rename = "type")]
    pub ty: String,
    /// A longer explanation of the mechanism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where to read more about this kind of error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_link: Option<Url>,
    /// Whether the application handled the error itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
    /// Whether the exception was fabricated by the client rather than thrown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<bool>,
    /// Mechanism-specific attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// One exception in a chain of causes.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Exception {
    /// The exception type name.
    #[serde(rename = "type")]
    pub ty: String,
    /// The rendered error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// The module the exception type lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// How this exception was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<Mechanism>,
}

/// Identifies the reporting client in outgoing payloads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientSdkInfo {
    /// The client name.
    pub name: String,
    /// The client version.
    pub version: String,
    /// Names of enabled integrations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<String>,
    /// Packages bundled with the client.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<ClientSdkPackage>,
}

/// A package shipping as part of the reporting client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientSdkPackage {
    /// The package name.
    pub name: String,
    /// The package version.
    pub version: String,
}

/// Typed context attached to an event under a named key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
#[non_exhaustive]
pub enum Context {
    /// Links the event into a distributed trace.
    Trace(Box<TraceContext>),
    /// Any other context payload.
    #[serde(rename = "unknown")]
    Other(Map<String, Value>),
}

impl Context {
    /// The wire name of this context variant.
    pub fn type_name(&self) -> &str {
        match *self {
            Context::Trace(..) => "trace",
            Context::Other(..) => "unknown",
        }
    }
}

impl From<TraceContext> for Context {
    fn from(data: TraceContext) -> Self {
        Context::Trace(Box::new(data))
    }
}

// SpanId and TraceId only differ in width, so one macro covers both. The ids
// travel as lowercase hex strings and default to fresh random bytes.
macro_rules! hex_id_type {
    ($(#[$attr:meta])* $name:ident, $len:expr) => {
        $(#[$attr])*
        #[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; $len]);

        impl Default for $name {
            fn default() -> Self {
                let mut bytes = [0u8; $len];
                getrandom::getrandom(&mut bytes).unwrap_or_else(|err| {
                    panic!("no entropy available for {}: {err}", stringify!($name))
                });
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(input, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = hex::FromHexError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

hex_id_type!(
    /// The 8 byte identifier of a single span.
    SpanId,
    8
);

hex_id_type!(
    /// The 16 byte identifier shared by all spans of one trace.
    TraceId,
    16
);

/// The trace position of a transaction, carried in its `contexts` map.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TraceContext {
    /// The span this context describes.
    #[serde(default)]
    pub span_id: SpanId,
    /// The trace the span belongs to.
    #[serde(default)]
    pub trace_id: TraceId,
    /// The span one level up, absent for trace roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// A short operation code such as `"http.server"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// A longer description of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the operation ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
}

/// An error report, the central payload of the protocol.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event<'a> {
    /// A random id identifying this report.
    #[serde(
        default = "defaults::event_id",
        serialize_with = "defaults::serialize_event_id"
    )]
    pub event_id: Uuid,
    /// Severity, `Error` unless set otherwise.
    #[serde(
        default = "defaults::event_level",
        skip_serializing_if = "Level::is_error"
    )]
    pub level: Level,
    /// Overrides how the collector groups this event.
    #[serde(
        default = "defaults::fingerprint",
        skip_serializing_if = "defaults::is_default_fingerprint"
    )]
    pub fingerprint: Cow<'a, [Cow<'a, str>]>,
    /// The code location blamed for the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
    /// The transaction the event happened inside of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// A plain log message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The logger that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// The producing platform, `"other"` unless set otherwise.
    #[serde(
        default = "defaults::platform",
        skip_serializing_if = "defaults::is_default_platform"
    )]
    pub platform: Cow<'a, str>,
    /// When the event happened.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub timestamp: SystemTime,
    /// The host or device the event was recorded on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<Cow<'a, str>>,
    /// The release of the reporting application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Cow<'a, str>>,
    /// The distribution within the release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Cow<'a, str>>,
    /// The deployment environment, e.g. `"production"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Cow<'a, str>>,
    /// The affected user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// The HTTP request being served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    /// Named typed contexts.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Context>,
    /// The trail of actions leading up to the event.
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub breadcrumbs: Values<Breadcrumb>,
    /// The exception chain, outermost last.
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub exception: Values<Exception>,
    /// Indexed key-value pairs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Unindexed key-value pairs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// The reporting client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<Cow<'a, ClientSdkInfo>>,
}

impl<'a> Default for Event<'a> {
    fn default() -> Self {
        Event {
            event_id: defaults::event_id(),
            level: defaults::event_level(),
            fingerprint: defaults::fingerprint(),
            culprit: Default::default(),
            transaction: Default::default(),
            message: Default::default(),
            logger: Default::default(),
            platform: defaults::platform(),
            timestamp: SystemTime::now(),
            server_name: Default::default(),
            release: Default::default(),
            dist: Default::default(),
            environment: Default::default(),
            user: Default::default(),
            request: Default::default(),
            contexts: Default::default(),
            breadcrumbs: Default::default(),
            exception: Default::default(),
            tags: Default::default(),
            extra: Default::default(),
            sdk: Default::default(),
        }
    }
}

impl<'a> Event<'a> {
    /// Creates an event with a fresh id and the current time.
    pub fn new() -> Event<'a> {
        Default::default()
    }

    /// Detaches the event from any borrowed strings.
    pub fn into_owned(self) -> Event<'static> {
        Event {
            event_id: self.event_id,
            level: self.level,
            fingerprint: Cow::Owned(
                self.fingerprint
                    .iter()
                    .map(|x| Cow::Owned(x.to_string()))
                    .collect(),
            ),
            culprit: self.culprit,
            transaction: self.transaction,
            message: self.message,
            logger: self.logger,
            platform: Cow::Owned(self.platform.into_owned()),
            timestamp: self.timestamp,
            server_name: self.server_name.map(|x| Cow::Owned(x.into_owned())),
            release: self.release.map(|x| Cow::Owned(x.into_owned())),
            dist: self.dist.map(|x| Cow::Owned(x.into_owned())),
            environment: self.environment.map(|x| Cow::Owned(x.into_owned())),
            user: self.user,
            request: self.request,
            contexts: self.contexts,
            breadcrumbs: self.breadcrumbs,
            exception: self.exception,
            tags: self.tags,
            extra: self.extra,
            sdk: self.sdk.map(|x| Cow::Owned(x.into_owned())),
        }
    }
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Event {} at {}",
            self.event_id,
            crate::utils::to_rfc3339(&self.timestamp)
        )
    }
}

/// A finished unit of work inside a transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Span {
    /// The id of this span.
    #[serde(default)]
    pub span_id: SpanId,
    /// The trace the span belongs to.
    #[serde(default)]
    pub trace_id: TraceId,
    /// The span one level up, absent for trace roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// A short operation code such as `"db.query"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// A longer description, e.g. the query being run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the span finished. `None` while still running.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_rfc3339_opt"
    )]
    pub timestamp: Option<SystemTime>,
    /// When the span started.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub start_timestamp: SystemTime,
    /// How the operation ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    /// Indexed key-value pairs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Arbitrary data attached to the span.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            span_id: Default::default(),
            trace_id: Default::default(),
            parent_span_id: Default::default(),
            op: Default::default(),
            description: Default::default(),
            timestamp: Default::default(),
            start_timestamp: SystemTime::now(),
            status: Default::default(),
            tags: Default::default(),
            data: Default::default(),
        }
    }
}

impl Span {
    /// Creates a span with fresh ids, starting now.
    pub fn new() -> Span {
        Default::default()
    }

    /// Marks the span as finished at the current time.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }

    /// Returns `true` once [`finish`](Self::finish) was called.
    pub fn is_finished(&self) -> bool {
        self.timestamp.is_some()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Span {} started {}",
            self.span_id,
            crate::utils::to_rfc3339(&self.start_timestamp)
        )
    }
}

/// Returned when a string is not a recognized span status.
#[derive(Debug, Error)]
#[error("invalid status")]
pub struct ParseStatusError;

/// How a span or transaction ended, loosely following HTTP and gRPC outcomes.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SpanStatus {
    /// Finished without incident.
    #[serde(rename = "ok")]
    Ok,
    /// Ran out of time before completing.
    #[serde(rename = "deadline_exceeded")]
    DeadlineExceeded,
    /// Missing or invalid credentials (HTTP 401).
    #[serde(rename = "unauthenticated")]
    Unauthenticated,
    /// Credentials valid but access refused (HTTP 403).
    #[serde(rename = "permission_denied")]
    PermissionDenied,
    /// The requested entity does not exist (HTTP 404).
    #[serde(rename = "not_found")]
    NotFound,
    /// Throttled by the remote side (HTTP 429).
    #[serde(rename = "resource_exhausted")]
    ResourceExhausted,
    /// The caller supplied bad input (other 4xx).
    #[serde(rename = "invalid_argument")]
    InvalidArgument,
    /// The operation is not supported (HTTP 501).
    #[serde(rename = "unimplemented")]
    Unimplemented,
    /// The service could not be reached (HTTP 503).
    #[serde(rename = "unavailable")]
    Unavailable,
    /// The remote side failed (other 5xx).
    #[serde(rename = "internal_error")]
    InternalError,
    /// Failed in a way that maps to no other status.
    #[serde(rename = "unknown_error")]
    UnknownError,
    /// Cancelled before completing, usually by the caller.
    #[serde(rename = "cancelled")]
    Cancelled,
    /// The entity being created already exists (HTTP 409).
    #[serde(rename = "already_exists")]
    AlreadyExists,
    /// The system was not in a state that allows the operation.
    #[serde(rename = "failed_precondition")]
    FailedPrecondition,
    /// Aborted, typically after losing a concurrency race.
    #[serde(rename = "aborted")]
    Aborted,
    /// An index or offset outside the valid range.
    #[serde(rename = "out_of_range")]
    OutOfRange,
    /// Data was lost or corrupted.
    #[serde(rename = "data_loss")]
    DataLoss,
}

impl SpanStatus {
    /// The snake_case wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::DeadlineExceeded => "deadline_exceeded",
            SpanStatus::Unauthenticated => "unauthenticated",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::NotFound => "not_found",
            SpanStatus::ResourceExhausted => "resource_exhausted",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::Unimplemented => "unimplemented",
            SpanStatus::Unavailable => "unavailable",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::UnknownError => "unknown_error",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::AlreadyExists => "already_exists",
            SpanStatus::FailedPrecondition => "failed_precondition",
            SpanStatus::Aborted => "aborted",
            SpanStatus::OutOfRange => "out_of_range",
            SpanStatus::DataLoss => "data_loss",
        }
    }
}

impl str::FromStr for SpanStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<SpanStatus, Self::Err> {
        Ok(match s {
            "ok" => SpanStatus::Ok,
            "deadline_exceeded" => SpanStatus::DeadlineExceeded,
            "unauthenticated" => SpanStatus::Unauthenticated,
            "permission_denied" => SpanStatus::PermissionDenied,
            "not_found" => SpanStatus::NotFound,
            "resource_exhausted" => SpanStatus::ResourceExhausted,
            "invalid_argument" => SpanStatus::InvalidArgument,
            "unimplemented" => SpanStatus::Unimplemented,
            "unavailable" => SpanStatus::Unavailable,
            "internal_error" => SpanStatus::InternalError,
            "unknown_error" => SpanStatus::UnknownError,
            "cancelled" => SpanStatus::Cancelled,
            "already_exists" => SpanStatus::AlreadyExists,
            "failed_precondition" => SpanStatus::FailedPrecondition,
            "aborted" => SpanStatus::Aborted,
            "out_of_range" => SpanStatus::OutOfRange,
            "data_loss" => SpanStatus::DataLoss,
            _ => return Err(ParseStatusError),
        })
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished trace segment with all of its child spans.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction<'a> {
    /// A random id identifying this transaction payload.
    #[serde(
        default = "defaults::event_id",
        serialize_with = "defaults::serialize_event_id"
    )]
    pub event_id: Uuid,
    /// A human readable name, e.g. the route or task being measured.
    #[serde(
        rename = "transaction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    /// The release of the reporting application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Cow<'a, str>>,
    /// The deployment environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Cow<'a, str>>,
    /// Indexed key-value pairs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Unindexed key-value pairs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// The reporting client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<Cow<'a, ClientSdkInfo>>,
    /// The producing platform, `"other"` unless set otherwise.
    #[serde(
        default = "defaults::platform",
        skip_serializing_if = "defaults::is_default_platform"
    )]
    pub platform: Cow<'a, str>,
    /// When the transaction finished. `None` while still running.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_rfc3339_opt"
    )]
    pub timestamp: Option<SystemTime>,
    /// When the transaction started.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub start_timestamp: SystemTime,
    /// The finished child spans.
    pub spans: Vec<Span>,
    /// Named typed contexts. The trace context lives here.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Context>,
    /// The HTTP request being served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Transaction {
            event_id: defaults::event_id(),
            name: Default::default(),
            release: Default::default(),
            environment: Default::default(),
            tags: Default::default(),
            extra: Default::default(),
            sdk: Default::default(),
            platform: defaults::platform(),
            timestamp: Default::default(),
            start_timestamp: SystemTime::now(),
            spans: Default::default(),
            contexts: Default::default(),
            request: Default::default(),
        }
    }
}

impl<'a> Transaction<'a> {
    /// Creates a transaction with a fresh id, starting now.
    pub fn new() -> Transaction<'a> {
        Default::default()
    }

    /// Detaches the transaction from any borrowed strings.
    pub fn into_owned(self) -> Transaction<'static> {
        Transaction {
            event_id: self.event_id,
            name: self.name,
            release: self.release.map(|x| Cow::Owned(x.into_owned())),
            environment: self.environment.map(|x| Cow::Owned(x.into_owned())),
            tags: self.tags,
            extra: self.extra,
            sdk: self.sdk.map(|x| Cow::Owned(x.into_owned())),
            platform: Cow::Owned(self.platform.into_owned()),
            timestamp: self.timestamp,
            start_timestamp: self.start_timestamp,
            spans: self.spans,
            contexts: self.contexts,
            request: self.request,
        }
    }

    /// Marks the transaction as finished at the current time.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }
}

impl fmt::Display for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Transaction {} started {}",
            self.event_id,
            crate::utils::to_rfc3339(&self.start_timestamp)
        )
    }
}
