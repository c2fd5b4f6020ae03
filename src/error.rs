use thiserror::Error;

/// Closed taxonomy of decode failures (spec §7).
///
/// `UnsupportedTypeCode` and `UnknownMetadataId` are recovered silently by the
/// caller-facing API and never surface through this type; they are listed here
/// because they are part of the logical taxonomy and are used internally to
/// decide whether a failure is containable.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("stream ended before a declared structure completed (at offset {offset})")]
    Truncated { offset: u64 },

    #[error("invalid format at offset {offset}: {message}")]
    InvalidFormat { offset: u64, message: String },

    #[error("malformed varint at offset {offset}: continuation byte overflow")]
    MalformedVarInt { offset: u64 },

    #[error("unknown block kind {name:?} at offset {offset}")]
    UnknownBlockKind { offset: u64, name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Binrw(#[from] binrw::Error),
}

impl DecodeError {
    pub fn invalid_format(offset: u64, message: impl Into<String>) -> Self {
        DecodeError::InvalidFormat {
            offset,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
