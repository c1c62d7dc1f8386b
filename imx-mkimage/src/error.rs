//! Error types for container image creation

use std::path::{Path, PathBuf};

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, MkImageError>;

/// Errors that can abort a container build
#[derive(thiserror::Error, Debug)]
pub enum MkImageError {
    #[error("Unsupported hash algorithm: {bits} bits (expected 256, 384 or 512)")]
    UnsupportedHashAlgorithm { bits: u32 },

    #[error("Unsupported image kind: {0}")]
    UnsupportedImageKind(String),

    #[error("Unrecognized directive in image stack: {0}")]
    UnrecognizedDirective(String),

    #[error("Image stack entry {index}: {reason}")]
    InvalidStackEntry { index: usize, reason: String },

    #[error("Empty image stack")]
    EmptyImageStack,

    #[error("No active container: a new container must be started before adding images")]
    NoActiveContainer,

    #[error("Too many containers: at most {max} are supported")]
    TooManyContainers { max: usize },

    #[error("Container {container} is full: at most {max} images are supported")]
    TooManyImages { container: usize, max: usize },

    #[error("Failed to {action} {path:?}: {source}")]
    FileAccess {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {path:?} is too small: {size} bytes, need at least {needed}")]
    FileTooSmall {
        path: PathBuf,
        size: u64,
        needed: u64,
    },

    #[error("File {path:?} is too large for a 32-bit image size: {size} bytes")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("Header buffer overflow: need {needed} bytes, {remaining} remaining")]
    HeaderOverflow { needed: usize, remaining: usize },

    #[error("Value 0x{value:x} does not fit the {field} field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("Image offset 0x{offset:x} lies before its container at 0x{container_start:x}")]
    OffsetUnderflow { offset: u32, container_start: u64 },

    #[error("Failed to allocate {size} bytes for the container headers")]
    Allocation { size: usize },

    #[error("Digest backend {backend} failed: {reason}")]
    DigestBackend {
        backend: &'static str,
        reason: String,
    },

    #[error("Layout conflict: {0}")]
    LayoutConflict(String),

    #[error("Invalid container data: {0}")]
    InvalidContainerData(String),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MkImageError {
    pub fn unsupported_image_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedImageKind(kind.into())
    }

    pub fn unrecognized_directive(op: impl Into<String>) -> Self {
        Self::UnrecognizedDirective(op.into())
    }

    pub fn invalid_container_data(msg: impl Into<String>) -> Self {
        Self::InvalidContainerData(msg.into())
    }

    pub fn layout_conflict(msg: impl Into<String>) -> Self {
        Self::LayoutConflict(msg.into())
    }

    pub fn digest_backend(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::DigestBackend {
            backend,
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the file it concerns
    pub fn file_access(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::FileAccess {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
