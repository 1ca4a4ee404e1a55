use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input, rejected before any device I/O.
    Validation,
    /// A device login failure.
    Auth,
    /// A network or TLS failure while talking to a device.
    Transport,
    /// A non-success status or malformed payload returned by a device.
    Device,
    /// An invalid or unreadable configuration.
    Config,
    /// An `MQTT` connection or subscription failure.
    Mqtt,
    /// A service discovery failure.
    Discovery,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Validation => "Validation",
            Self::Auth => "Auth",
            Self::Transport => "Transport",
            Self::Device => "Device",
            Self::Config => "Config",
            Self::Mqtt => "Mqtt",
            Self::Discovery => "Discovery",
        }
        .fmt(f)
    }
}

/// Library error.
#[derive(Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Creates a [`ErrorKind::Validation`] error.
    #[must_use]
    #[inline]
    pub fn validation(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, description)
    }

    /// Creates a [`ErrorKind::Device`] error.
    #[must_use]
    #[inline]
    pub fn device(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Device, description)
    }

    /// Returns the [`ErrorKind`] associated with this error.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

/// A specialized [`Result`] type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
