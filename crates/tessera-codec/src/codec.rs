use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

const MARKER_RAW: u8 = 0x00;
const MARKER_ZSTD: u8 = 0x01;

/// Encodes and decodes blobs stored in the coordination store and broker.
///
/// Decoding accepts both raw and compressed blobs regardless of how the codec
/// is configured, so peers with different compression settings interoperate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
  compression: Option<i32>,
}

impl Codec {
  /// A codec that writes uncompressed CBOR.
  pub fn plain() -> Self {
    Self { compression: None }
  }

  /// A codec that compresses with zstd at the given level.
  pub fn zstd(level: i32) -> Self {
    Self {
      compression: Some(level),
    }
  }

  pub fn compression_level(&self) -> Option<i32> {
    self.compression
  }

  pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
    let mut raw = Vec::new();
    ciborium::into_writer(value, &mut raw).map_err(|e| CodecError::Encode {
      message: e.to_string(),
    })?;

    match self.compression {
      None => {
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.push(MARKER_RAW);
        out.extend_from_slice(&raw);
        Ok(out)
      }
      Some(level) => {
        let compressed =
          zstd::encode_all(raw.as_slice(), level).map_err(CodecError::Compression)?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(MARKER_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
      }
    }
  }

  pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
    let (marker, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    match *marker {
      MARKER_RAW => read_cbor(body),
      MARKER_ZSTD => {
        let raw = zstd::decode_all(body).map_err(CodecError::Compression)?;
        read_cbor(&raw)
      }
      other => Err(CodecError::UnknownFormat(other)),
    }
  }
}

fn read_cbor<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
  ciborium::from_reader(body).map_err(|e| CodecError::decode(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::{NodeRef, Value};
  use serde::Deserialize;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Envelope {
    exec_id: u64,
    args: Vec<Value>,
  }

  fn sample() -> Envelope {
    Envelope {
      exec_id: 3,
      args: vec![
        Value::Ref(NodeRef::new(1)),
        Value::List(vec![Value::Ref(NodeRef::new(2)), Value::Str("x".into())]),
        Value::map([("blob", Value::bytes(vec![0u8, 1, 2]))]),
      ],
    }
  }

  #[test]
  fn test_nested_refs_survive_encoding() {
    let codec = Codec::plain();
    let bytes = codec.encode(&sample()).unwrap();
    assert_eq!(bytes[0], MARKER_RAW);

    let decoded: Envelope = codec.decode(&bytes).unwrap();
    assert_eq!(decoded, sample());
    assert_eq!(decoded.args[1].as_list().unwrap()[0].as_node_ref(), Some(NodeRef::new(2)));
  }

  #[test]
  fn test_scalars_and_empty_containers_survive_encoding() {
    let values = vec![
      Value::Null,
      Value::Bool(true),
      Value::Bool(false),
      Value::Float(1.5),
      Value::Float(-1e300),
      Value::Int(0),
      Value::Int(i64::MIN),
      Value::Int(i64::MAX),
      Value::Str(String::new()),
      Value::bytes(Vec::<u8>::new()),
      Value::List(Vec::new()),
      Value::map(Vec::<(String, Value)>::new()),
    ];

    for codec in [Codec::plain(), Codec::zstd(3)] {
      let bytes = codec.encode(&values).unwrap();
      let decoded: Vec<Value> = codec.decode(&bytes).unwrap();
      assert_eq!(decoded, values);
    }
  }

  #[test]
  fn test_compressed_blobs_decode_with_any_codec() {
    let bytes = Codec::zstd(3).encode(&sample()).unwrap();
    assert_eq!(bytes[0], MARKER_ZSTD);

    let decoded: Envelope = Codec::plain().decode(&bytes).unwrap();
    assert_eq!(decoded, sample());
  }

  #[test]
  fn test_rejects_empty_payload() {
    let err = Codec::plain().decode::<Value>(&[]).unwrap_err();
    assert!(matches!(err, CodecError::Empty));
  }

  #[test]
  fn test_rejects_unknown_marker() {
    let err = Codec::plain().decode::<Value>(&[0x7f, 0x00]).unwrap_err();
    assert!(matches!(err, CodecError::UnknownFormat(0x7f)));
  }

  #[test]
  fn test_rejects_garbage() {
    let err = Codec::plain()
      .decode::<Envelope>(&[MARKER_RAW, 0xff, 0xff, 0x13])
      .unwrap_err();
    assert!(matches!(err, CodecError::Decode { .. }));
  }

  #[test]
  fn test_rejects_unknown_tag() {
    let mut raw = vec![MARKER_RAW];
    let tagged = ciborium::value::Value::Tag(7, Box::new(ciborium::value::Value::Null));
    ciborium::into_writer(&tagged, &mut raw).unwrap();

    let err = Codec::plain().decode::<Value>(&raw).unwrap_err();
    assert!(matches!(err, CodecError::Decode { .. }));
  }
}
