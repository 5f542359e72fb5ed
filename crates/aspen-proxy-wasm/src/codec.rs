//! Binary codec for ordered header and trailer lists.
//!
//! ## Layout
//!
//! ```text
//! u32 count
//! count × (u32 key_len, u32 value_len)
//! count × (key bytes, 0x00, value bytes, 0x00)
//! ```
//!
//! All integers are little-endian. The NUL after each key and value is a
//! sentinel and is not counted in its length. Pair order is wire order and
//! keys may repeat.

use crate::error::HostResult;
use crate::error::Status;

const U32_LEN: usize = std::mem::size_of::<u32>();

/// Encode an ordered list of key/value pairs.
pub fn encode_pairs<K, V>(pairs: &[(K, V)]) -> Vec<u8>
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let payload_len: usize = pairs.iter().map(|(k, v)| k.as_ref().len() + v.as_ref().len() + 2).sum();
    let mut out = Vec::with_capacity(U32_LEN + pairs.len() * 2 * U32_LEN + payload_len);

    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for (key, value) in pairs {
        out.extend_from_slice(&(key.as_ref().len() as u32).to_le_bytes());
        out.extend_from_slice(&(value.as_ref().len() as u32).to_le_bytes());
    }
    for (key, value) in pairs {
        out.extend_from_slice(key.as_ref());
        out.push(0);
        out.extend_from_slice(value.as_ref());
        out.push(0);
    }
    out
}

/// Decode a buffer produced by [`encode_pairs`] (or by the host).
///
/// An empty buffer decodes to an empty list; hosts return no buffer at all for
/// an empty map.
pub fn decode_pairs(bytes: &[u8]) -> HostResult<Vec<(Vec<u8>, Vec<u8>)>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor { bytes, offset: 0 };
    let count = cursor.read_u32()? as usize;

    // Every pair needs at least its two lengths and two sentinels.
    if count > bytes.len() / (2 * U32_LEN + 2) {
        tracing::warn!(count, len = bytes.len(), "header map count exceeds buffer size");
        return Err(Status::ParseFailure);
    }

    let mut lengths = Vec::with_capacity(count);
    for _ in 0..count {
        let key_len = cursor.read_u32()? as usize;
        let value_len = cursor.read_u32()? as usize;
        lengths.push((key_len, value_len));
    }

    let mut pairs = Vec::with_capacity(count);
    for (key_len, value_len) in lengths {
        let key = cursor.read_terminated(key_len)?;
        let value = cursor.read_terminated(value_len)?;
        pairs.push((key.to_vec(), value.to_vec()));
    }
    Ok(pairs)
}

/// Encode string pairs.
pub fn encode_headers(headers: &[(&str, &str)]) -> Vec<u8> {
    encode_pairs(headers)
}

/// Decode into string pairs. Non-UTF-8 content is a `ParseFailure`.
pub fn decode_headers(bytes: &[u8]) -> HostResult<Vec<(String, String)>> {
    let utf8 = |raw: Vec<u8>| String::from_utf8(raw).map_err(|_| Status::ParseFailure);
    decode_pairs(bytes)?.into_iter().map(|(k, v)| Ok((utf8(k)?, utf8(v)?))).collect()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> HostResult<&'a [u8]> {
        let end = self.offset.checked_add(len).ok_or(Status::ParseFailure)?;
        let slice = self.bytes.get(self.offset..end).ok_or(Status::ParseFailure)?;
        self.offset = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> HostResult<u32> {
        let raw = self.take(U32_LEN)?;
        let mut buf = [0u8; U32_LEN];
        buf.copy_from_slice(raw);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read `len` bytes and skip the trailing sentinel.
    fn read_terminated(&mut self, len: usize) -> HostResult<&'a [u8]> {
        let data = self.take(len)?;
        self.take(1)?;
        Ok(data)
    }
}
