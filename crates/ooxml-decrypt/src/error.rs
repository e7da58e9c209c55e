use thiserror::Error;

/// Errors returned by this crate.
///
/// A wrong password is *not* an error for [`crate::Decryptor::verify_password`]; it is reported
/// as `Ok(false)`. [`DecryptError::InvalidPassword`] is only produced by the one-shot helpers
/// that were asked for plaintext.
#[derive(Debug, Error)]
pub enum DecryptError {
    /// Malformed, truncated, or inconsistent container/header bytes.
    #[error("invalid format: {0}")]
    Format(String),
    /// A recognized algorithm, hash, or version combination that is not implemented.
    #[error("unsupported encryption: {0}")]
    UnsupportedScheme(String),
    /// An operation was invoked before its required prior step.
    #[error("invalid state: {0}")]
    State(&'static str),
    #[error("invalid password")]
    InvalidPassword,
    #[error("integrity check failed")]
    Integrity,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse category of a [`DecryptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    UnsupportedScheme,
    State,
    Io,
    /// Password or integrity verification failed.
    Verification,
}

impl DecryptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecryptError::Format(_) => ErrorKind::Format,
            DecryptError::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            DecryptError::State(_) => ErrorKind::State,
            DecryptError::Io(_) => ErrorKind::Io,
            DecryptError::InvalidPassword | DecryptError::Integrity => ErrorKind::Verification,
        }
    }

    pub(crate) fn truncated(context: &str) -> Self {
        DecryptError::Format(format!("truncated data while reading {context}"))
    }
}

impl From<DecryptError> for std::io::Error {
    fn from(err: DecryptError) -> Self {
        match err {
            DecryptError::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecryptError>;
