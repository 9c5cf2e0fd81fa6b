//! Error type shared across the rpicprog crates.

use thiserror::Error;

/// Error taxonomy for the whole programmer stack.
///
/// Variants carry a human-readable detail string; the variant itself is the
/// machine-readable classification that recovery logic dispatches on (the
/// high-level programmer retries reads on [`Error::SyncLost`], everything
/// else propagates unchanged).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Opening or configuring the programmer hardware failed.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// Fewer input bytes were drained than were written during a read.
    #[error("lost synchronization: {0}")]
    SyncLost(String),

    /// Database lookup by ID or name found nothing.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The USB write path reported an error.
    #[error("USB write error: {0}")]
    UsbWrite(String),

    /// A program image violates the device geometry.
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// The requested operation is not supported for this family or section.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Caller misuse, e.g. an unaligned write address.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed HEX or device database input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Read-back after a write did not match what was written.
    #[error("verification error: {0}")]
    Verification(String),

    /// A file could not be opened.
    #[error("file not found: {0}")]
    FileNotFound(String),
}

impl Error {
    /// Append context to the detail string, keeping the classification.
    pub fn with_context(self, context: &str) -> Self {
        let append = |message: String| format!("{message}{context}");
        match self {
            Error::InitFailed(m) => Error::InitFailed(append(m)),
            Error::SyncLost(m) => Error::SyncLost(append(m)),
            Error::DeviceNotFound(m) => Error::DeviceNotFound(append(m)),
            Error::UsbWrite(m) => Error::UsbWrite(append(m)),
            Error::InvalidProgram(m) => Error::InvalidProgram(append(m)),
            Error::Unimplemented(m) => Error::Unimplemented(append(m)),
            Error::InvalidArgument(m) => Error::InvalidArgument(append(m)),
            Error::Parse(m) => Error::Parse(append(m)),
            Error::Verification(m) => Error::Verification(append(m)),
            Error::FileNotFound(m) => Error::FileNotFound(append(m)),
        }
    }
}

/// Result alias used by every fallible API in this workspace.
pub type Result<T> = std::result::Result<T, Error>;
