//! Little-endian payload writer and bounds-checked reader over `bytes`

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use bytemuck::Pod;
use bytes::{Buf, BufMut, BytesMut};

/// Growable payload buffer
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished payload
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Lengths and indices are stored as `u64`
    pub fn put_len(&mut self, v: usize) {
        self.put_u64(v as u64);
    }

    pub fn put_dtype(&mut self, dtype: DType) {
        self.put_u8(dtype.to_u8());
    }

    /// Scalar element, little-endian
    pub fn put_value<T: Pod>(&mut self, v: T) {
        self.put_pod_slice(std::slice::from_ref(&v));
    }

    /// Length-prefixed array of elements
    pub fn put_slice<T: Pod>(&mut self, values: &[T]) {
        self.put_len(values.len());
        self.put_pod_slice(values);
    }

    /// Length-prefixed array of indices
    pub fn put_indices(&mut self, values: &[usize]) {
        self.put_len(values.len());
        self.buf.reserve(values.len() * 8);
        for &v in values {
            self.put_len(v);
        }
    }

    /// Length-prefixed UTF-8 string
    pub fn put_str(&mut self, s: &str) {
        self.put_slice(s.as_bytes());
    }

    fn put_pod_slice<T: Pod>(&mut self, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        if cfg!(target_endian = "little") {
            self.buf.put_slice(bytes);
        } else {
            for chunk in bytes.chunks_exact(size_of::<T>()) {
                self.buf.extend(chunk.iter().rev());
            }
        }
    }
}

/// Cursor over a payload; every read fails cleanly on truncation
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Unread byte count
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Unread bytes, consuming the reader
    pub fn into_rest(self) -> &'a [u8] {
        self.buf
    }

    /// Fails unless `n` more bytes are available
    pub fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::deserialization(format!(
                "truncated: {n} bytes needed, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Fixed-size byte array
    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Fail unless every byte was consumed
    pub fn finish(&self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(Error::deserialization(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// A length or index written by [`Writer::put_len`]
    pub fn get_len(&mut self) -> Result<usize> {
        let v = self.get_u64()?;
        usize::try_from(v).map_err(|_| Error::deserialization(format!("length {v} overflows")))
    }

    /// Element type tag, required to equal `T`'s
    pub fn expect_dtype<T: Element>(&mut self) -> Result<()> {
        match self.get_dtype()? {
            d if d == T::DTYPE => Ok(()),
            d => Err(Error::deserialization(format!(
                "archive holds {d} elements, {} requested",
                T::DTYPE
            ))),
        }
    }

    /// Element type code written by [`Writer::put_dtype`]
    pub fn get_dtype(&mut self) -> Result<DType> {
        let code = self.get_u8()?;
        DType::from_u8(code)
            .ok_or_else(|| Error::deserialization(format!("unknown dtype code {code}")))
    }

    /// Scalar written by [`Writer::put_value`]
    pub fn get_value<T: Pod>(&mut self) -> Result<T> {
        let size = size_of::<T>();
        self.ensure(size)?;
        let value = read_pod(&self.buf[..size]);
        self.buf.advance(size);
        Ok(value)
    }

    /// Array written by [`Writer::put_slice`]
    pub fn get_vec<T: Pod>(&mut self) -> Result<Vec<T>> {
        let n = self.get_len()?;
        let size = n
            .checked_mul(size_of::<T>())
            .ok_or_else(|| Error::deserialization(format!("array of {n} elements overflows")))?;
        self.ensure(size)?;
        let values = self.buf[..size]
            .chunks_exact(size_of::<T>())
            .map(read_pod)
            .collect();
        self.buf.advance(size);
        Ok(values)
    }

    /// Array written by [`Writer::put_indices`]
    pub fn get_indices(&mut self) -> Result<Vec<usize>> {
        let n = self.get_len()?;
        self.ensure(n.checked_mul(8).unwrap_or(usize::MAX))?;
        (0..n).map(|_| self.get_len()).collect()
    }

    /// String written by [`Writer::put_str`]
    pub fn get_string(&mut self) -> Result<String> {
        String::from_utf8(self.get_vec::<u8>()?)
            .map_err(|e| Error::deserialization(format!("invalid UTF-8: {e}")))
    }
}

fn read_pod<T: Pod>(bytes: &[u8]) -> T {
    if cfg!(target_endian = "little") {
        bytemuck::pod_read_unaligned(bytes)
    } else {
        let mut swapped = bytes.to_vec();
        swapped.reverse();
        bytemuck::pod_read_unaligned(&swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_little_endian() {
        let mut w = Writer::new();
        w.put_u16(0x0102);
        w.put_value(1.0f32);
        assert_eq!(w.into_bytes(), [0x02, 0x01, 0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_truncated_array_is_rejected() {
        let mut w = Writer::new();
        w.put_slice(&[1.0f64, 2.0, 3.0]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes[..bytes.len() - 1]);
        assert!(r.get_vec::<f64>().is_err());

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_vec::<f64>().unwrap(), [1.0, 2.0, 3.0]);
        r.finish().unwrap();
    }

    #[test]
    fn test_huge_declared_length_fails_without_allocating() {
        let mut w = Writer::new();
        w.put_u64(u64::MAX);
        let bytes = w.into_bytes();
        assert!(Reader::new(&bytes).get_vec::<f64>().is_err());
        assert!(Reader::new(&bytes).get_indices().is_err());
    }

    #[test]
    fn test_dtype_check() {
        let mut w = Writer::new();
        w.put_dtype(DType::F32);
        let bytes = w.into_bytes();
        assert!(Reader::new(&bytes).expect_dtype::<f32>().is_ok());
        assert!(Reader::new(&bytes).expect_dtype::<f64>().is_err());
    }

    #[test]
    fn test_fixed_array_and_rest() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u16(9);
        w.put_u8(1);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_array::<3>().unwrap(), [7, 9, 0]);
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.into_rest(), &[1]);
        assert!(Reader::new(&bytes).get_array::<5>().is_err());
    }
}
