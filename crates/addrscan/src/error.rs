use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid signature pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Signature '{pattern}' not found in {extent}")]
    SignatureNotFound { pattern: String, extent: String },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Address {resolver}.{field} is not resolved: {reason}")]
    AddressNotResolved {
        resolver: String,
        field: String,
        reason: String,
    },

    #[error("Unknown field {resolver}.{field}")]
    UnknownField { resolver: String, field: String },

    #[error("Resolver already registered: {0}")]
    DuplicateResolver(String),

    #[error("Field {resolver}.{field} is declared more than once")]
    DuplicateField { resolver: String, field: String },

    #[error("Section '{section}' not found in module {module}")]
    SectionNotFound { module: String, section: String },

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Invalid module image: {0}")]
    InvalidImage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    /// A read failure means the module went away or a page became protected.
    /// The resolver pass that hit it must stop instead of trying later fields.
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(self, Error::MemoryReadFailed { .. })
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
