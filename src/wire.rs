//! Hand-rolled protobuf wire codec and gRPC framing.
//!
//! The language server's `Metadata` message moves field numbers between
//! releases, so the bridge encodes against field numbers discovered at
//! runtime (see [`crate::discovery`]) instead of compiled stubs. Only the
//! two wire types the bridge produces are implemented: varint (0) and
//! length-delimited (2). Fixed 64/32-bit fields occur in responses and are
//! skipped on read.
//!
//! Decoders never panic and never error: malformed input aborts the current
//! parse and returns whatever was collected, leaving policy to callers.

use std::io::Read;

/// Varint wire type.
pub const WIRE_VARINT: u8 = 0;
/// Length-delimited wire type.
pub const WIRE_LEN: u8 = 2;

/// Append an unsigned LEB128 varint.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Read an unsigned LEB128 varint at `*pos`, advancing on success.
///
/// Varints longer than 10 bytes are rejected.
pub fn get_varint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut cursor = *pos;
    loop {
        if shift >= 70 {
            return None;
        }
        let byte = *buf.get(cursor)?;
        cursor += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            *pos = cursor;
            return Some(value);
        }
        shift += 7;
    }
}

/// Append a field tag: `(field_number << 3) | wire_type`.
pub fn put_tag(buf: &mut Vec<u8>, field: u32, wire: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire));
}

/// Append a varint field.
pub fn put_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    put_tag(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

/// Append a length-delimited field (string, bytes, or nested message).
pub fn put_bytes_field(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append a UTF-8 string field.
pub fn put_str_field(buf: &mut Vec<u8>, field: u32, value: &str) {
    put_bytes_field(buf, field, value.as_bytes());
}

/// A decoded field value. The scanner assumes no schema; consumers match on
/// field numbers and ignore what they do not recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0.
    Varint(u64),
    /// Wire type 2.
    Bytes(&'a [u8]),
}

/// One field yielded by [`fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
}

/// Lazy field scanner over an encoded message.
pub struct FieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Field<'a>;

    fn next(&mut self) -> Option<Field<'a>> {
        loop {
            if self.pos >= self.buf.len() {
                return None;
            }
            let tag = get_varint(self.buf, &mut self.pos)?;
            let number = u32::try_from(tag >> 3).ok()?;
            match (tag & 0x7) as u8 {
                WIRE_VARINT => {
                    let value = get_varint(self.buf, &mut self.pos)?;
                    return Some(Field {
                        number,
                        value: FieldValue::Varint(value),
                    });
                }
                WIRE_LEN => {
                    let len = get_varint(self.buf, &mut self.pos)? as usize;
                    let end = self.pos.checked_add(len)?;
                    if end > self.buf.len() {
                        return None;
                    }
                    let bytes = &self.buf[self.pos..end];
                    self.pos = end;
                    return Some(Field {
                        number,
                        value: FieldValue::Bytes(bytes),
                    });
                }
                // Fixed 64/32-bit: responses only, skip the payload.
                1 => {
                    self.pos = self.pos.checked_add(8)?;
                    if self.pos > self.buf.len() {
                        return None;
                    }
                }
                5 => {
                    self.pos = self.pos.checked_add(4)?;
                    if self.pos > self.buf.len() {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    }
}

/// Scan the fields of an encoded message.
pub fn fields(buf: &[u8]) -> FieldIter<'_> {
    FieldIter { buf, pos: 0 }
}

/// First length-delimited occurrence of `field`, as raw bytes.
pub fn first_bytes<'a>(buf: &'a [u8], field: u32) -> Option<&'a [u8]> {
    fields(buf).find_map(|f| match f.value {
        FieldValue::Bytes(b) if f.number == field => Some(b),
        _ => None,
    })
}

/// First length-delimited occurrence of `field`, as a UTF-8 string.
pub fn first_string(buf: &[u8], field: u32) -> Option<String> {
    first_bytes(buf, field).map(|b| String::from_utf8_lossy(b).into_owned())
}

/// Wrap a protobuf payload in a gRPC frame: compression byte (identity),
/// big-endian length, payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(0);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a response body into gRPC frame payloads.
///
/// A body may carry several concatenated frames. Iteration stops silently
/// when fewer than five bytes remain or a declared length overruns the
/// buffer; a partial tail is ignored. Compression byte 1 is gzip; any other
/// non-zero value is treated as identity.
pub fn unframe(body: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while body.len() - pos >= 5 {
        let compression = body[pos];
        let len = u32::from_be_bytes([body[pos + 1], body[pos + 2], body[pos + 3], body[pos + 4]])
            as usize;
        pos += 5;
        if len > body.len() - pos {
            break;
        }
        let payload = &body[pos..pos + len];
        pos += len;
        if compression == 1 {
            match gunzip(payload) {
                Some(decoded) => out.push(decoded),
                None => break,
            }
        } else {
            out.push(payload.to_vec());
        }
    }
    out
}

fn gunzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn varint_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [
            0u64,
            1,
            127,
            128,
            300,
            16_383,
            16_384,
            u64::from(u32::MAX),
            (1 << 63) - 1,
        ] {
            let buf = varint_bytes(value);
            let mut pos = 0;
            assert_eq!(get_varint(&buf, &mut pos), Some(value), "value {value}");
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(1), vec![0x01]);
        assert_eq!(varint_bytes(300), vec![0xac, 0x02]);
    }

    #[test]
    fn test_varint_rejects_overlong() {
        let buf = vec![0x80u8; 11];
        let mut pos = 0;
        assert_eq!(get_varint(&buf, &mut pos), None);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_varint_truncated() {
        let buf = vec![0x80u8, 0x80];
        let mut pos = 0;
        assert_eq!(get_varint(&buf, &mut pos), None);
    }

    #[test]
    fn test_string_field_roundtrip() {
        for field in [1u32, 2, 15, 16, 2048, (1 << 29) - 1] {
            let mut buf = Vec::new();
            put_str_field(&mut buf, field, "héllo wörld");
            let decoded = fields(&buf).collect::<Vec<_>>();
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].number, field);
            assert_eq!(
                decoded[0].value,
                FieldValue::Bytes("héllo wörld".as_bytes())
            );
        }
    }

    #[test]
    fn test_varint_field_roundtrip() {
        let mut buf = Vec::new();
        put_varint_field(&mut buf, 9, 42);
        let decoded = fields(&buf).collect::<Vec<_>>();
        assert_eq!(decoded[0].number, 9);
        assert_eq!(decoded[0].value, FieldValue::Varint(42));
    }

    #[test]
    fn test_nested_message() {
        let mut inner = Vec::new();
        put_str_field(&mut inner, 1, "c1");
        let mut outer = Vec::new();
        put_bytes_field(&mut outer, 20, &inner);

        let nested = first_bytes(&outer, 20).expect("nested message");
        assert_eq!(first_string(nested, 1).as_deref(), Some("c1"));
    }

    #[test]
    fn test_fixed_fields_skipped() {
        let mut buf = Vec::new();
        // field 3, wire 1 (fixed64)
        put_tag(&mut buf, 3, 1);
        buf.extend_from_slice(&[0u8; 8]);
        // field 4, wire 5 (fixed32)
        put_tag(&mut buf, 4, 5);
        buf.extend_from_slice(&[0u8; 4]);
        put_str_field(&mut buf, 5, "after");

        let decoded = fields(&buf).collect::<Vec<_>>();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].number, 5);
    }

    #[test]
    fn test_malformed_returns_partial() {
        let mut buf = Vec::new();
        put_str_field(&mut buf, 1, "ok");
        // Truncated length-delimited field: declares 100 bytes, has none.
        put_tag(&mut buf, 2, WIRE_LEN);
        put_varint(&mut buf, 100);

        let decoded = fields(&buf).collect::<Vec<_>>();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].number, 1);
    }

    #[test]
    fn test_frame_unframe_roundtrip() {
        let payload = b"arbitrary payload bytes".to_vec();
        let framed = frame(&payload);
        assert_eq!(framed[0], 0);
        let frames = unframe(&framed);
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_unframe_concatenated() {
        let mut body = frame(b"first");
        body.extend_from_slice(&frame(b"second"));
        let frames = unframe(&body);
        assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_unframe_ignores_partial_tail() {
        let mut body = frame(b"whole");
        // Declares 1000 bytes but the body ends immediately after.
        body.push(0);
        body.extend_from_slice(&1000u32.to_be_bytes());
        let frames = unframe(&body);
        assert_eq!(frames, vec![b"whole".to_vec()]);
    }

    #[test]
    fn test_unframe_short_tail() {
        let mut body = frame(b"whole");
        body.extend_from_slice(&[0, 0, 0]);
        assert_eq!(unframe(&body).len(), 1);
    }

    #[test]
    fn test_unframe_gzip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let gz = encoder.finish().unwrap();

        let mut body = vec![1u8];
        body.extend_from_slice(&(gz.len() as u32).to_be_bytes());
        body.extend_from_slice(&gz);

        let frames = unframe(&body);
        assert_eq!(frames, vec![b"compressed payload".to_vec()]);
    }

    #[test]
    fn test_unframe_unknown_compression_is_identity() {
        let mut body = vec![7u8];
        body.extend_from_slice(&5u32.to_be_bytes());
        body.extend_from_slice(b"as-is");
        assert_eq!(unframe(&body), vec![b"as-is".to_vec()]);
    }
}
