//! Error types and result definitions for the capture-and-relay engine.
//!
//! The [`RelayError`] type carries an [`ErrorKind`] used by the capture loop
//! to decide whether a failure is absorbed (per record), retried (per cycle),
//! or fatal to the pipeline, together with a description, optional dynamic
//! detail, an optional source error, and the callsite that produced it.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for relay operations using [`RelayError`] as the error type.
pub type RelayResult<T> = Result<T, RelayError>;

/// Detailed payload stored for single [`RelayError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type for relay operations.
///
/// Represents either a single classified error or an aggregation of errors
/// collected while waiting on multiple pipelines.
#[derive(Debug, Clone)]
pub struct RelayError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly produced when waiting for several
    /// pipelines at once.
    Many {
        errors: Vec<RelayError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while capturing and relaying changes.
///
/// The kinds map onto the engine's propagation policy: environment and
/// threshold errors terminate a pipeline, source and publish errors abort one
/// cycle, conversion errors skip one record.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Pre-start environment validation failed; the pipeline never starts capturing.
    EnvironmentInvalid,
    /// Invalid or inconsistent configuration.
    ConfigError,

    /// Could not reach the source database or log stream.
    SourceConnectionFailed,
    /// A query against the source failed; retried on the next cycle.
    SourceQueryFailed,
    /// A single change record could not be converted; the record is skipped.
    ConversionError,

    /// The broker rejected or timed out a publish; the batch is retried and
    /// the watermark is not advanced.
    PublishFailed,
    /// Reading or advancing the durable publish position failed.
    OffsetStoreError,

    /// The leadership lease was lost; the pipeline performs a clean forced stop.
    LeadershipLost,
    /// Too many consecutive capture-loop errors; the pipeline stops and
    /// surfaces a fatal failure.
    ErrorThresholdExceeded,

    /// An operation was attempted in a state that does not allow it.
    InvalidState,
    /// The capture worker task panicked.
    CaptureWorkerPanic,
    /// The capture worker task was cancelled.
    CaptureWorkerCancelled,

    /// Unknown or uncategorized failure.
    Unknown,
}

impl RelayError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] when the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first contained
    /// error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        RelayError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &RelayError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    payload.location.file(),
                    payload.location.line(),
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error(s) aggregated @ {}:{}",
                    errors.len(),
                    location.file(),
                    location.line(),
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (i, line) in rendered.lines().enumerate() {
                        if i == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for RelayError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_deref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for RelayError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        RelayError::from_components(kind, Cow::Borrowed(description), None)
    }
}

impl From<(ErrorKind, String)> for RelayError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, String)) -> Self {
        RelayError::from_components(kind, Cow::Owned(description), None)
    }
}

impl From<(ErrorKind, &'static str, String)> for RelayError {
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        RelayError::from_components(kind, Cow::Borrowed(description), Some(Cow::Owned(detail)))
    }
}

impl From<Vec<RelayError>> for RelayError {
    #[track_caller]
    fn from(errors: Vec<RelayError>) -> Self {
        RelayError {
            repr: ErrorRepr::Many {
                errors,
                location: Location::caller(),
            },
        }
    }
}
