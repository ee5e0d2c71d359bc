//! Error types and error handling strategy for the propagation core.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - A stored failure is cheaply cloneable, so it can be re-raised to every
//!   consumer and adopted by any number of derived states
//! - Panics in user callables are isolated and converted to
//!   [`ErrorKind::Panicked`] failures

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Producer lifecycle ===
    /// No producer remained to fulfil a pending state.
    BrokenPromise,

    // === Continuation attachment ===
    /// A second claimer was attached to a value that can only be moved out.
    MultipleValueContinuations,
    /// A second failure continuation was attached.
    MultipleErrorContinuations,
    /// No explicit executor was given and the state has no captured scheduler.
    NoExecutor,
    /// The state was drained and no longer accepts continuations.
    Spent,

    // === Aggregation ===
    /// One or more inputs of an aggregate failed; carries an [`ErrorList`].
    Aggregate,

    // === User callables ===
    /// A user callable panicked.
    Panicked,
    /// User-provided error.
    User,

    // === Internal / state machine ===
    /// Internal invariant violation (bug).
    Internal,
}

/// The main error type for propagation-core operations.
///
/// Cloning is cheap: the source chain is arc-shared, which is what allows a
/// settled failure to be handed to every consumer that re-raises it.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is the broken-promise outcome.
    #[must_use]
    pub const fn is_broken_promise(&self) -> bool {
        matches!(self.kind, ErrorKind::BrokenPromise)
    }

    /// Returns true if this error carries an aggregated error list.
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self.kind, ErrorKind::Aggregate)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Wraps an application error from a user callable.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Creates an application error from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(message)
    }

    /// Creates a failure from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: PanicPayload) -> Self {
        Self::new(ErrorKind::Panicked).with_source(payload)
    }

    /// Creates an aggregate failure carrying the given error list.
    #[must_use]
    pub fn aggregate(list: ErrorList) -> Self {
        Self::new(ErrorKind::Aggregate).with_source(list)
    }

    /// Returns the aggregated error list, if this is an aggregate failure.
    #[must_use]
    pub fn aggregate_list(&self) -> Option<&ErrorList> {
        self.source.as_ref()?.downcast_ref()
    }

    /// Returns the caught panic payload, if this is a panic failure.
    #[must_use]
    pub fn panic_payload(&self) -> Option<&PanicPayload> {
        self.source.as_ref()?.downcast_ref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Payload from a caught panic.
///
/// Wraps the panic value for safe transport into a failure arm.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from a raw payload caught by `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload.downcast_ref::<&'static str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .map_or_else(|| "opaque panic payload".to_string(), Clone::clone)
            },
            |s| (*s).to_string(),
        );
        Self::new(message)
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicPayload {}

/// An ordered collection of failures gathered by an aggregation.
///
/// Each failed input contributes exactly one entry, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct ErrorList(Vec<Error>);

impl ErrorList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an error.
    pub fn push(&mut self, error: Error) {
        self.0.push(error);
    }

    /// Returns the number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no errors were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the collected errors in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// Returns the first collected error, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Error> {
        self.0.first()
    }
}

impl From<Vec<Error>> for ErrorList {
    fn from(errors: Vec<Error>) -> Self {
        Self(errors)
    }
}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a Error;
    type IntoIter = std::slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            write!(f, "; [{i}] {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for propagation-core operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::BrokenPromise);
        assert_eq!(err.to_string(), "BrokenPromise");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::NoExecutor).with_context("no scheduler captured");
        assert_eq!(err.to_string(), "NoExecutor: no scheduler captured");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::user(Underlying).with_context("outer");
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn aggregate_list_round_trip() {
        let mut list = ErrorList::new();
        list.push(Error::msg("first"));
        list.push(Error::msg("second"));
        let err = Error::aggregate(list);

        assert!(err.is_aggregate());
        let recovered = err.aggregate_list().expect("list missing");
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.first().expect("empty").kind(), ErrorKind::User);
    }

    #[test]
    fn panic_payload_from_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(PanicPayload::from_any(boxed.as_ref()).message(), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(PanicPayload::from_any(boxed.as_ref()).message(), "kaboom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(17_u32);
        assert_eq!(
            PanicPayload::from_any(boxed.as_ref()).message(),
            "opaque panic payload"
        );
    }

    #[test]
    fn panic_payload_is_recoverable() {
        let err = Error::panicked(PanicPayload::new("boom"));
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.panic_payload().expect("payload").message(), "boom");
    }

    #[test]
    fn error_list_display_enumerates() {
        let mut list = ErrorList::new();
        list.push(Error::msg("a"));
        let rendered = list.to_string();
        assert!(rendered.starts_with("1 error(s)"));
        assert!(rendered.contains("User: a"));
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::Spent));
        let err = res.context("attach failed").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Spent);
        assert_eq!(err.to_string(), "Spent: attach failed");
    }

    #[test]
    fn clone_preserves_kind_and_source() {
        let err = Error::user(Underlying);
        let cloned = err.clone();
        assert_eq!(cloned.kind(), ErrorKind::User);
        assert!(cloned.source().is_some());
    }
}
