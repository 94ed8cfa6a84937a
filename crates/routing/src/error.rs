use parley_common::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
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
