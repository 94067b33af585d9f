/*!
 * Error types for the berryrig engine crate.
 */
use thiserror::Error;

/// Error type for berryrig engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Hardware description error (structure, duplicate id)
    #[error("Description error: {0}")]
    Description(String),

    /// Element failed schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Action dispatch error
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// An action referenced an element id that does not exist
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] berryrig_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] berryrig_core::error::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for berryrig engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new description error
    pub fn description<S: AsRef<str>>(msg: S) -> Self {
        Error::Description(msg.as_ref().to_string())
    }

    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        Error::Validation(msg.as_ref().to_string())
    }

    /// Create a new dispatch error
    pub fn dispatch<S: AsRef<str>>(msg: S) -> Self {
        Error::Dispatch(msg.as_ref().to_string())
    }

    /// Create a new unknown-element error
    pub fn unknown_element<S: AsRef<str>>(id: S) -> Self {
        Error::UnknownElement(id.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
