use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Rendered attempts in a [`ResolutionExhaustedError`] message.
const MAX_REPORTED_ATTEMPTS: usize = 10;

/// Longest rendering of a single attempt's error, in characters.
const MAX_ATTEMPT_MESSAGE: usize = 512;

/// Categorizes fetch errors by their meaning, independent of the getter
/// which produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetterErrorKind {
    /// The requested artifact, manifest or file does not exist.
    NotFound,

    /// The caller is not allowed to read the artifact.
    ///
    /// Check the registry credentials.
    PermissionDenied,

    /// Network or disk I/O failed.
    ///
    /// May be transient.
    Io,

    /// The remote service answered with a server error or rate limit.
    ServiceUnavailable,

    /// The request itself is invalid: bad URI, unsupported scheme, malformed
    /// reference.
    InvalidRequest,

    /// Downloaded content did not match its declared digest.
    Integrity,

    /// Every candidate location for a reference failed.
    ///
    /// The source is a [`ResolutionExhaustedError`] carrying every attempt.
    ResolutionExhausted,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl GetterErrorKind {
    /// Whether retrying the same request later might succeed.
    ///
    /// Advisory only. Getters themselves make a single attempt per location.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GetterErrorKind::ServiceUnavailable | GetterErrorKind::Io
        )
    }
}

impl fmt::Display for GetterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetterErrorKind::NotFound => write!(f, "not found"),
            GetterErrorKind::PermissionDenied => write!(f, "permission denied"),
            GetterErrorKind::Io => write!(f, "I/O error"),
            GetterErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            GetterErrorKind::InvalidRequest => write!(f, "invalid request"),
            GetterErrorKind::Integrity => write!(f, "integrity check failed"),
            GetterErrorKind::ResolutionExhausted => write!(f, "resolution exhausted"),
            GetterErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Controlled by `RUST_BACKTRACE`.
    backtrace: Backtrace,

    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An error produced while fetching content through a [`Getter`](crate::Getter).
///
/// Carries the kind of failure, the getter which failed, the URI being
/// fetched when known, the underlying error, and backtrace / span trace
/// captured at construction.
///
/// # Example
///
/// ```rust
/// use chart_getter::{GetterError, GetterErrorKind};
///
/// let error = GetterError::builder(
///     "oci",
///     GetterErrorKind::NotFound,
///     "manifest unknown",
/// )
/// .uri("oci://registry.example.com/charts/foo:1.0")
/// .build();
///
/// assert_eq!(error.kind(), GetterErrorKind::NotFound);
/// assert_eq!(error.uri(), Some("oci://registry.example.com/charts/foo:1.0"));
/// ```
#[derive(Debug)]
pub struct GetterError {
    kind: GetterErrorKind,

    /// Name of the getter which produced this error.
    getter: &'static str,

    uri: Option<String>,

    context: Option<String>,

    source: BoxError,

    traces: Box<ErrorTrace>,
}

impl StdError for GetterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl GetterError {
    /// Create a new error with the minimum required information.
    pub fn new<E>(getter: &'static str, kind: GetterErrorKind, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            getter,
            uri: None,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a builder, to attach the URI or extra context.
    pub fn builder<E>(getter: &'static str, kind: GetterErrorKind, error: E) -> GetterErrorBuilder
    where
        E: Into<BoxError>,
    {
        GetterErrorBuilder {
            getter,
            kind,
            source: error.into(),
            uri: None,
            context: None,
        }
    }

    /// Returns a boxed closure converting a downstream error, for use with
    /// `.map_err()`.
    pub fn with<E>(
        getter: &'static str,
        kind: GetterErrorKind,
    ) -> Box<dyn FnOnce(E) -> GetterError + Send + Sync>
    where
        E: Into<BoxError>,
    {
        Box::new(move |error: E| GetterError::new(getter, kind, error))
    }

    /// Map an I/O error onto the closest kind.
    pub fn io(getter: &'static str, error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => GetterErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => GetterErrorKind::PermissionDenied,
            _ => GetterErrorKind::Io,
        };
        GetterError::new(getter, kind, error)
    }

    /// The kind of failure.
    pub fn kind(&self) -> GetterErrorKind {
        self.kind
    }

    /// Name of the getter which produced this error.
    pub fn getter(&self) -> &'static str {
        self.getter
    }

    /// The URI being fetched, if known.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Additional context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The per-candidate report, when every candidate location failed.
    pub fn exhausted(&self) -> Option<&ResolutionExhaustedError> {
        self.source.downcast_ref()
    }

    /// Captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Span context at the point this error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }

    pub(crate) fn set_uri(mut self, uri: impl Into<String>) -> Self {
        if self.uri.is_none() {
            self.uri = Some(uri.into());
        }
        self
    }
}

impl fmt::Display for GetterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} getter [{}]", self.getter, self.kind)?;

        if let Some(uri) = &self.uri {
            write!(f, " ({uri})")?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for [`GetterError`] with optional context fields.
#[derive(Debug)]
pub struct GetterErrorBuilder {
    kind: GetterErrorKind,
    getter: &'static str,
    source: BoxError,
    uri: Option<String>,
    context: Option<String>,
}

impl GetterErrorBuilder {
    /// Set the URI being fetched.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the error.
    pub fn build(self) -> GetterError {
        GetterError {
            kind: self.kind,
            getter: self.getter,
            uri: self.uri,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

/// A single failed attempt against one candidate location.
#[derive(Debug)]
pub struct Attempt {
    /// The candidate URI which was fetched.
    pub location: String,

    /// Why it failed.
    pub error: GetterError,
}

/// Every candidate location for a reference failed.
///
/// All attempts are retained, in the order they were made. The rendered
/// message embeds at most ten of them, each cut to 512 characters.
#[derive(Debug)]
pub struct ResolutionExhaustedError {
    reference: String,
    attempts: Vec<Attempt>,
}

impl ResolutionExhaustedError {
    /// Create a report for `reference` from its failed attempts.
    pub fn new(reference: impl Into<String>, attempts: Vec<Attempt>) -> Self {
        Self {
            reference: reference.into(),
            attempts,
        }
    }

    /// The reference which could not be fetched.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Every failed attempt, in attempt order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }
}

impl fmt::Display for ResolutionExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to resolve OCI ref {}: {} candidate location(s) failed",
            self.reference,
            self.attempts.len()
        )?;

        for (index, attempt) in self.attempts.iter().take(MAX_REPORTED_ATTEMPTS).enumerate() {
            let message = attempt.error.to_string();
            let mut chars = message.chars();
            let shown: String = chars.by_ref().take(MAX_ATTEMPT_MESSAGE).collect();
            let ellipsis = if chars.next().is_some() { "..." } else { "" };

            write!(
                f,
                "\n  [{}] {}: {shown}{ellipsis}",
                index + 1,
                attempt.location
            )?;
        }

        if self.attempts.len() > MAX_REPORTED_ATTEMPTS {
            write!(
                f,
                "\n  ... and {} more failed attempts",
                self.attempts.len() - MAX_REPORTED_ATTEMPTS
            )?;
        }

        Ok(())
    }
}

impl StdError for ResolutionExhaustedError {}
