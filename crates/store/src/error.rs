use parley_common::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Routing(#[from] parley_routing::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("username already taken")]
    UsernameExists,
    #[error("email already registered")]
    EmailExists,
    #[error("email password no match")]
    BadCredentials,
    #[error("email password no match")]
    UnknownEmail,
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(MessageError::new(message))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
