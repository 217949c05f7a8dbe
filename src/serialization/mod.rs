//! Versioned binary archives of models, partial results and buffers
//!
//! Every archive is one envelope:
//!
//! ```text
//! offset  size  field
//! 0       4     magic  b"AKIT"
//! 4       2     type tag        (u16 LE)
//! 6       2     format version  (u16 LE)
//! 8       8     payload length  (u64 LE)
//! 16      n     payload
//! ```
//!
//! Payload integers are little-endian; numeric arrays are a `u64` element
//! count followed by the raw little-endian elements. Floating-point payloads
//! start with the element [`DType`](crate::dtype::DType) code, so an `f32`
//! archive never decodes as `f64`.

mod codec;
mod impls;

pub use codec::{Reader, Writer};

use crate::error::{Error, Result};
use bytes::BufMut;

/// First four bytes of every archive
pub const MAGIC: [u8; 4] = *b"AKIT";

/// Envelope bytes before the payload
pub const HEADER_LEN: usize = 16;

/// Types that round-trip through an archive
pub trait Serializable: Sized {
    /// Stable identifier of the type family
    const TYPE_TAG: u16;
    /// Payload format version written by [`Serializable::encode`]
    const VERSION: u16;
    /// Name used in error messages
    const NAME: &'static str;

    /// Append the payload
    fn encode(&self, w: &mut Writer);

    /// Read a payload written by `encode`
    fn decode(r: &mut Reader<'_>) -> Result<Self>;

    /// Shape the value commits to, checked by [`deserialize_into`]
    fn declared_shape(&self) -> Vec<usize>;
}

/// Archive `value` into a fresh buffer
pub fn serialize<M: Serializable>(value: &M) -> Vec<u8> {
    let mut payload = Writer::new();
    value.encode(&mut payload);
    let payload = payload.into_bytes();

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.put_slice(&MAGIC);
    out.put_u16_le(M::TYPE_TAG);
    out.put_u16_le(M::VERSION);
    out.put_u64_le(payload.len() as u64);
    out.put_slice(&payload);
    tracing::trace!(type_tag = M::TYPE_TAG, bytes = out.len(), "serialized {}", M::NAME);
    out
}

/// Payload of an archive of `M`, after checking the envelope
fn open<M: Serializable>(bytes: &[u8]) -> Result<&[u8]> {
    let mut header = Reader::new(bytes);
    let magic = header.get_array::<4>()?;
    if magic != MAGIC {
        return Err(Error::deserialization(format!(
            "bad magic {magic:02x?}, expected {MAGIC:02x?}"
        )));
    }
    let tag = header.get_u16()?;
    if tag != M::TYPE_TAG {
        return Err(Error::TypeTagMismatch {
            expected: M::TYPE_TAG,
            got: tag,
        });
    }
    let version = header.get_u16()?;
    if version != M::VERSION {
        return Err(Error::UnsupportedVersion {
            type_tag: tag,
            version,
        });
    }
    let len = header.get_len()?;
    let payload = header.into_rest();
    if payload.len() != len {
        return Err(Error::deserialization(format!(
            "payload of {} bytes, header declares {len}",
            payload.len()
        )));
    }
    Ok(payload)
}

/// Decode an archive written by [`serialize`]
pub fn deserialize<M: Serializable>(bytes: &[u8]) -> Result<M> {
    let mut r = Reader::new(open::<M>(bytes)?);
    let value = M::decode(&mut r)?;
    r.finish()?;
    Ok(value)
}

/// Decode into `target`, which must declare the archived shape
///
/// `target` is left untouched on any error.
pub fn deserialize_into<M: Serializable>(target: &mut M, bytes: &[u8]) -> Result<()> {
    let value = deserialize::<M>(bytes)?;
    let expected = target.declared_shape();
    let got = value.declared_shape();
    if expected != got {
        return Err(Error::DeserializationMismatch {
            what: M::NAME,
            expected,
            got,
        });
    }
    *target = value;
    Ok(())
}
