//! Tessera Codec
//!
//! This crate provides the dynamic [`Value`] type passed between graph nodes and
//! the [`Codec`] that turns values (and anything else `serde` can describe) into
//! compact binary blobs.
//!
//! Blobs are CBOR containers. Node references ([`NodeRef`]) are written as a
//! dedicated CBOR tag, so a reference nested anywhere inside a list or map comes
//! back as a typed reference rather than a plain integer.
//!
//! Every blob starts with a one-byte format marker:
//!
//! ```text
//! ┌────────┬──────────────────────────────┐
//! │ marker │ body                         │
//! ├────────┼──────────────────────────────┤
//! │  0x00  │ raw CBOR                     │
//! │  0x01  │ zstd-compressed CBOR         │
//! └────────┴──────────────────────────────┘
//! ```

mod codec;
mod error;
mod value;

pub use codec::Codec;
pub use error::CodecError;
pub use value::{NodeRef, REF_TAG, Value};
