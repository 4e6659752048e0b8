use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the pairing storage modules and the factory reset.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum StorageError {
    /// The durable store failed to read, write or delete a key.
    #[error("io error during {context}: {message}")]
    Io {
        /// The operation and key involved.
        context: String,
        /// Message from the underlying I/O error.
        message: String,
    },

    /// A persisted record could not be decoded.
    #[error("invalid record at '{key}': {reason}")]
    InvalidRecord {
        /// The durable key of the record.
        key: String,
        /// Why the record was rejected.
        reason: String,
    },

    /// A caller supplied an unusable argument.
    #[error("invalid input '{parameter}': {reason}")]
    InvalidInput {
        /// Name of the offending parameter.
        parameter: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A module failed to delete its data during a factory reset.
    ///
    /// The reset flag stays set; the reset is resumed by the next
    /// `factory_reset` call or at the next boot.
    #[error("factory reset incomplete, module '{module}' failed: {source}")]
    ResetIncomplete {
        /// Registry name of the failing module.
        module: String,
        /// The module's error.
        source: Box<StorageError>,
    },

    /// Two reset modules were registered under the same name.
    #[error("duplicate reset module: {0}")]
    DuplicateModule(String),

    /// Record serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage owner lock could not be taken.
    #[error("storage lock error: {0}")]
    Lock(String),

    /// The storage configuration is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, err: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input<P: Into<String>, R: Into<String>>(parameter: P, reason: R) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that a retried `factory_reset` or the next
    /// boot is expected to clear.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ResetIncomplete { .. })
    }
}
