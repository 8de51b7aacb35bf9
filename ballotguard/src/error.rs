use crate::*;

use thiserror::Error;

/// Coordinator error types
///
/// Every variant except `Internal` is a deterministic function of the current
/// state and the request, and can be surfaced to the caller verbatim.
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotguard: not found: {0}")]
    NotFound(String),

    #[error("ballotguard: already exists: {0}")]
    AlreadyExists(String),

    #[error("ballotguard: forbidden: {0}")]
    Forbidden(String),

    #[error("ballotguard: precondition failed: {0}")]
    PreconditionFailed(String),

    #[error(
        "ballotguard: decryption share failed validation for contest: {contest_id} selection: {selection_id}"
    )]
    InvalidShare {
        contest_id: String,
        selection_id: String,
    },

    #[error("ballotguard: invalid partial key backup from guardian {owner_id}: {reason}")]
    InvalidBackup { owner_id: GuardianId, reason: String },

    #[error("ballotguard: invalid public key set for guardian {0}")]
    InvalidPublicKeys(GuardianId),

    #[error("ballotguard: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ballotguard: internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The HTTP-equivalent status for this error, for transports that surface it.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::Forbidden(_) => 403,
            Error::PreconditionFailed(_) => 412,
            Error::InvalidShare { .. }
            | Error::InvalidBackup { .. }
            | Error::InvalidPublicKeys(_)
            | Error::InvalidArgument(_) => 400,
            Error::Internal(_) => 500,
        }
    }

    /// True when the caller can fix the request; false for opaque internal failures.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, key } => {
                Error::NotFound(format!("{} {}", collection, key))
            }
            StoreError::AlreadyExists { collection, key } => {
                Error::AlreadyExists(format!("{} {}", collection, key))
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", e))
    }
}

/// Failures inside the cryptographic primitives
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ballotguard crypto: invalid group element encoding")]
    InvalidElement,

    #[error("ballotguard crypto: invalid scalar encoding")]
    InvalidScalar,

    #[error("ballotguard crypto: quorum must be at least 1")]
    InvalidQuorum,

    #[error("ballotguard crypto: ecies encryption failed")]
    EncryptionFailed,

    #[error("ballotguard crypto: ecies decryption failed")]
    DecryptionFailed,

    #[error("ballotguard crypto: key derivation failed")]
    KeyDerivation,

    #[error("ballotguard crypto: missing decryption share from {guardian_id} for contest {contest_id} selection {selection_id}")]
    MissingShare {
        guardian_id: GuardianId,
        contest_id: String,
        selection_id: String,
    },

    #[error("ballotguard crypto: no decryption shares supplied")]
    NoShares,

    #[error("ballotguard crypto: decrypted value of selection {0} is out of range (max {1})")]
    DiscreteLogOutOfRange(String, u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(Error::NotFound("k1".into()).status_code(), 404);
        assert_eq!(Error::AlreadyExists("k1".into()).status_code(), 409);
        assert_eq!(Error::Forbidden("k1".into()).status_code(), 403);
        assert_eq!(Error::PreconditionFailed("k1".into()).status_code(), 412);
        assert_eq!(
            Error::InvalidShare {
                contest_id: "c".into(),
                selection_id: "s".into()
            }
            .status_code(),
            400
        );
        assert!(!Error::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn store_errors_keep_their_class() {
        let not_found: Error = StoreError::NotFound {
            collection: Collection::KeyCeremony,
            key: "k1".into(),
        }
        .into();
        assert!(matches!(not_found, Error::NotFound(_)));

        let conflict: Error = StoreError::Conflict {
            collection: Collection::KeyCeremony,
            key: "k1".into(),
        }
        .into();
        assert!(matches!(conflict, Error::Internal(_)));
    }
}
