use thiserror::Error;

/// Errors produced while encoding or decoding blobs and values.
#[derive(Debug, Error)]
pub enum CodecError {
  /// Serialization to CBOR failed.
  #[error("failed to encode: {message}")]
  Encode { message: String },

  /// The payload is not valid CBOR for the requested type.
  #[error("failed to decode: {message}")]
  Decode { message: String },

  /// The payload has no format marker.
  #[error("empty payload")]
  Empty,

  /// The payload starts with a marker this codec does not know.
  #[error("unknown payload format marker {0:#04x}")]
  UnknownFormat(u8),

  /// zstd compression or decompression failed.
  #[error("compression error: {0}")]
  Compression(#[source] std::io::Error),

  /// A value had a different shape than the caller asked for.
  #[error("type mismatch: expected {expected}, found {found}")]
  TypeMismatch {
    expected: &'static str,
    found: &'static str,
  },
}

impl CodecError {
  pub(crate) fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }
}
