//! The payload codec turns a message's property bag into an opaque blob and back. The framing
//!  layer does not look inside the blob.
//!
//! [BinaryPropertyCodec] is a versionless, self-delimiting tagged format:
//!
//! ```ascii
//! properties: entry count (varint) followed by that many entries
//! entry:      key (varint length + UTF-8 bytes), value
//! value:      tag (u8) followed by tag-specific data:
//!   0 null     -
//!   1 bool     u8 (0 or 1)
//!   2 int      zig-zag varint
//!   3 float    f64 BE
//!   4 string   varint length + UTF-8 bytes
//!   5 bytes    varint length + raw bytes
//!   6 list     varint count + values
//!   7 map      varint count + entries
//! ```

use std::collections::BTreeMap;
use std::io;

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};
use bytes_varint::VarIntSupportMut;

use crate::error::{TransportError, TransportResult};
use crate::message::{Properties, PropertyValue};
use crate::util::buf_ext::{BufExt, BufMutExt};

pub trait PayloadCodec: Send + Sync + 'static {
    fn encode(&self, properties: &Properties) -> TransportResult<Bytes>;

    fn decode(&self, buf: &[u8]) -> anyhow::Result<Properties>;
}

/// Nested lists and maps are limited to this depth, both for encoding and decoding
pub const MAX_NESTING_DEPTH: usize = 64;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

#[derive(Default, Debug, Clone, Copy)]
pub struct BinaryPropertyCodec;

impl PayloadCodec for BinaryPropertyCodec {
    fn encode(&self, properties: &Properties) -> TransportResult<Bytes> {
        let mut buf = BytesMut::new();
        ser_map(properties, &mut buf, 0)
            .map_err(|msg| TransportError::from(io::Error::new(io::ErrorKind::InvalidData, msg)))?;
        Ok(buf.freeze())
    }

    fn decode(&self, mut buf: &[u8]) -> anyhow::Result<Properties> {
        let result = deser_map(&mut buf, 0)?;
        if !buf.is_empty() {
            bail!("{} trailing bytes after the encoded properties", buf.len());
        }
        Ok(result)
    }
}

fn ser_map(map: &BTreeMap<String, PropertyValue>, buf: &mut BytesMut, depth: usize) -> Result<(), String> {
    buf.put_usize_varint_len(map.len());
    for (key, value) in map {
        buf.put_varint_string(key);
        ser_value(value, buf, depth)?;
    }
    Ok(())
}

fn ser_value(value: &PropertyValue, buf: &mut BytesMut, depth: usize) -> Result<(), String> {
    match value {
        PropertyValue::Null => buf.put_u8(TAG_NULL),
        PropertyValue::Bool(b) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(if *b { 1 } else { 0 });
        }
        PropertyValue::Int(n) => {
            buf.put_u8(TAG_INT);
            buf.put_i64_varint(*n);
        }
        PropertyValue::Float(f) => {
            buf.put_u8(TAG_FLOAT);
            buf.put_f64(*f);
        }
        PropertyValue::Str(s) => {
            buf.put_u8(TAG_STRING);
            buf.put_varint_string(s);
        }
        PropertyValue::Bytes(raw) => {
            buf.put_u8(TAG_BYTES);
            buf.put_usize_varint_len(raw.len());
            buf.put_slice(raw);
        }
        PropertyValue::List(values) => {
            check_depth(depth)?;
            buf.put_u8(TAG_LIST);
            buf.put_usize_varint_len(values.len());
            for v in values {
                ser_value(v, buf, depth + 1)?;
            }
        }
        PropertyValue::Map(map) => {
            check_depth(depth)?;
            buf.put_u8(TAG_MAP);
            ser_map(map, buf, depth + 1)?;
        }
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<(), String> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(format!("property values are nested deeper than {} levels", MAX_NESTING_DEPTH));
    }
    Ok(())
}

fn deser_map(buf: &mut &[u8], depth: usize) -> anyhow::Result<BTreeMap<String, PropertyValue>> {
    let len = buf.checked_get_usize_varint()?;
    let mut result = BTreeMap::new();
    for _ in 0..len {
        let key = buf.checked_get_string()?;
        let value = deser_value(buf, depth)?;
        result.insert(key, value);
    }
    Ok(result)
}

fn deser_value(buf: &mut &[u8], depth: usize) -> anyhow::Result<PropertyValue> {
    let value = match buf.checked_get_u8()? {
        TAG_NULL => PropertyValue::Null,
        TAG_BOOL => match buf.checked_get_u8()? {
            0 => PropertyValue::Bool(false),
            1 => PropertyValue::Bool(true),
            n => bail!("invalid boolean value {}", n),
        },
        TAG_INT => PropertyValue::Int(buf.checked_get_i64_varint()?),
        TAG_FLOAT => PropertyValue::Float(buf.checked_get_f64()?),
        TAG_STRING => PropertyValue::Str(buf.checked_get_string()?),
        TAG_BYTES => {
            let len = buf.checked_get_usize_varint()?;
            PropertyValue::Bytes(buf.checked_get_vec(len)?)
        }
        TAG_LIST => {
            if depth >= MAX_NESTING_DEPTH {
                bail!("property values are nested deeper than {} levels", MAX_NESTING_DEPTH);
            }
            let len = buf.checked_get_usize_varint()?;
            // no pre-allocation based on the length: it comes from the network
            let mut values = Vec::new();
            for _ in 0..len {
                values.push(deser_value(buf, depth + 1)?);
            }
            PropertyValue::List(values)
        }
        TAG_MAP => {
            if depth >= MAX_NESTING_DEPTH {
                bail!("property values are nested deeper than {} levels", MAX_NESTING_DEPTH);
            }
            PropertyValue::Map(deser_map(buf, depth + 1)?)
        }
        tag => bail!("invalid property value tag {}", tag),
    };
    Ok(value)
}
