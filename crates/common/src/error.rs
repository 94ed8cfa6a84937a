//! Error-handling glue shared by the parley crates.
//!
//! Each crate owns a `thiserror` enum with `#[from]` conversions for the
//! stores it talks to. [`Context`] folds any other failure into a
//! [`MessageError`] with a prefix, and a `#[from] MessageError` variant on
//! the crate enum picks it up from there.

use thiserror::Error;

/// A contextual error message produced by [`Context`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MessageError {
    message: String,
}

impl MessageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Attach context to a fallible value, flattening the failure into a
/// [`MessageError`].
pub trait Context<T> {
    fn context(self, context: impl Into<String>) -> Result<T, MessageError>;

    /// Lazy variant for contexts that cost something to build.
    fn with_context<C, F>(self, f: F) -> Result<T, MessageError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: std::fmt::Display> Context<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, MessageError> {
        self.map_err(|source| MessageError::new(format!("{}: {source}", context.into())))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, MessageError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| MessageError::new(format!("{}: {source}", f().into())))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, context: impl Into<String>) -> Result<T, MessageError> {
        self.ok_or_else(|| MessageError::new(context.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, MessageError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| MessageError::new(f().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_the_source_error() {
        let res: Result<(), &str> = Err("connection refused");
        let err = res.context("routing store").unwrap_err();
        assert_eq!(err.to_string(), "routing store: connection refused");
    }

    #[test]
    fn context_on_none_is_just_the_message() {
        let missing: Option<u16> = None;
        let err = missing.context("no port configured").unwrap_err();
        assert_eq!(err.to_string(), "no port configured");
    }

    #[test]
    fn with_context_stays_lazy_on_success() {
        let ok: Result<u16, &str> = Ok(7);
        let folded = ok.with_context(|| -> String { panic!("must stay lazy") });
        assert_eq!(folded.ok(), Some(7));
    }
}
