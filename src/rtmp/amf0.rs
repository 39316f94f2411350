use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::BufMut;

use crate::error::AmfError;
use crate::rtmp::amf3::Amf3Decoder;

pub const NUMBER_MARKER: u8 = 0x00;
pub const BOOLEAN_MARKER: u8 = 0x01;
pub const STRING_MARKER: u8 = 0x02;
pub const OBJECT_MARKER: u8 = 0x03;
pub const MOVIECLIP_MARKER: u8 = 0x04;
pub const NULL_MARKER: u8 = 0x05;
pub const UNDEFINED_MARKER: u8 = 0x06;
pub const REFERENCE_MARKER: u8 = 0x07;
pub const ECMA_ARRAY_MARKER: u8 = 0x08;
pub const OBJECT_END_MARKER: u8 = 0x09;
pub const STRICT_ARRAY_MARKER: u8 = 0x0a;
pub const DATE_MARKER: u8 = 0x0b;
pub const LONG_STRING_MARKER: u8 = 0x0c;
pub const UNSUPPORTED_MARKER: u8 = 0x0d;
pub const RECORDSET_MARKER: u8 = 0x0e;
pub const XML_DOCUMENT_MARKER: u8 = 0x0f;
pub const TYPED_OBJECT_MARKER: u8 = 0x10;
pub const AVMPLUS_OBJECT_MARKER: u8 = 0x11;

/// Longest string that still fits the 16-bit length of the short string form.
pub const STRING_MAX: usize = u16::MAX as usize;

/// Anonymous object / ECMA array body. Key order carries no meaning.
pub type Amf0Object = BTreeMap<String, Amf0Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Amf0Object),
    Null,
    Undefined,
    EcmaArray(Amf0Object),
    StrictArray(Vec<Amf0Value>),
    /// Milliseconds since the Unix epoch. The timezone field is dropped on decode.
    Date(f64),
    TypedObject {
        class_name: String,
        object: Amf0Object,
    },
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Amf0Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Amf0Object> {
        match self {
            Amf0Value::Object(obj)
            | Amf0Value::EcmaArray(obj)
            | Amf0Value::TypedObject { object: obj, .. } => Some(obj),
            _ => None,
        }
    }

    pub fn get_property(&self, key: &str) -> Option<&Amf0Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Null and undefined both stand for "no value".
    pub fn is_null(&self) -> bool {
        matches!(self, Amf0Value::Null | Amf0Value::Undefined)
    }
}

impl fmt::Display for Amf0Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amf0Value::Number(n) => write!(f, "{}", n),
            Amf0Value::Boolean(b) => write!(f, "{}", b),
            Amf0Value::String(s) => write!(f, "\"{}\"", s),
            Amf0Value::Object(obj) | Amf0Value::EcmaArray(obj) => write_object(f, obj),
            Amf0Value::TypedObject { class_name, object } => {
                write!(f, "{} ", class_name)?;
                write_object(f, object)
            }
            Amf0Value::Null => write!(f, "null"),
            Amf0Value::Undefined => write!(f, "undefined"),
            Amf0Value::Date(ms) => write!(f, "Date({})", ms),
            Amf0Value::StrictArray(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_object(f: &mut fmt::Formatter<'_>, obj: &Amf0Object) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in obj.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", k, v)?;
    }
    write!(f, "}}")
}

// ── Native conversions ──

impl From<bool> for Amf0Value {
    fn from(v: bool) -> Self {
        Amf0Value::Boolean(v)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Amf0Value {
                fn from(v: $t) -> Self {
                    Amf0Value::Number(v as f64)
                }
            }
        )*
    };
}

number_from!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl From<&str> for Amf0Value {
    fn from(v: &str) -> Self {
        Amf0Value::String(v.to_string())
    }
}

impl From<String> for Amf0Value {
    fn from(v: String) -> Self {
        Amf0Value::String(v)
    }
}

impl<T: Into<Amf0Value>> From<Option<T>> for Amf0Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Amf0Value::Null, Into::into)
    }
}

impl<T: Into<Amf0Value>> From<Vec<T>> for Amf0Value {
    fn from(items: Vec<T>) -> Self {
        Amf0Value::StrictArray(items.into_iter().map(Into::into).collect())
    }
}

impl From<Amf0Object> for Amf0Value {
    fn from(obj: Amf0Object) -> Self {
        Amf0Value::Object(obj)
    }
}

impl<V: Into<Amf0Value>> From<HashMap<String, V>> for Amf0Value {
    fn from(map: HashMap<String, V>) -> Self {
        Amf0Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Builds an anonymous object from `(key, value)` pairs.
pub fn object<K, V, I>(pairs: I) -> Amf0Value
where
    K: Into<String>,
    V: Into<Amf0Value>,
    I: IntoIterator<Item = (K, V)>,
{
    Amf0Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

// ── Decoder ──

/// Deepest nesting of objects and arrays accepted by the decoders, AMF3 included.
pub const MAX_NESTING_DEPTH: usize = 64;

pub struct Amf0Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Amf0Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, depth: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn decode(&mut self) -> Result<Amf0Value, AmfError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(AmfError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = self.decode_value();
        self.depth -= 1;
        result
    }

    fn decode_value(&mut self) -> Result<Amf0Value, AmfError> {
        let marker = self.read_u8()?;

        match marker {
            NUMBER_MARKER => Ok(Amf0Value::Number(self.read_f64()?)),
            BOOLEAN_MARKER => Ok(Amf0Value::Boolean(self.read_u8()? != 0)),
            STRING_MARKER => Ok(Amf0Value::String(self.read_utf8()?)),
            OBJECT_MARKER => Ok(Amf0Value::Object(self.read_object_properties()?)),
            NULL_MARKER => Ok(Amf0Value::Null),
            UNDEFINED_MARKER => Ok(Amf0Value::Undefined),
            REFERENCE_MARKER => Err(AmfError::NotImplemented("reference type")),
            ECMA_ARRAY_MARKER => {
                // The associative count is unreliable in the wild; the end marker decides.
                let _count = self.read_u32()?;
                Ok(Amf0Value::EcmaArray(self.read_object_properties()?))
            }
            STRICT_ARRAY_MARKER => self.read_strict_array(),
            DATE_MARKER => {
                let ms = self.read_f64()?;
                let _timezone = self.read_bytes(2)?;
                Ok(Amf0Value::Date(ms))
            }
            LONG_STRING_MARKER | XML_DOCUMENT_MARKER => {
                Ok(Amf0Value::String(self.read_utf8_long()?))
            }
            TYPED_OBJECT_MARKER => {
                let class_name = self.read_utf8()?;
                let object = self.read_object_properties()?;
                Ok(Amf0Value::TypedObject { class_name, object })
            }
            AVMPLUS_OBJECT_MARKER => {
                let mut amf3 = Amf3Decoder::with_depth(&self.data[self.pos..], self.depth);
                let value = amf3.decode()?;
                self.pos += amf3.position();
                Ok(value)
            }
            MOVIECLIP_MARKER | UNSUPPORTED_MARKER | RECORDSET_MARKER => {
                Err(AmfError::UnsupportedType(marker))
            }
            _ => Err(AmfError::InvalidMarker(marker)),
        }
    }

    /// Decodes values until the input is exhausted. Running out of input between
    /// two values ends the batch; running out inside a value is an error.
    pub fn decode_all(&mut self) -> Result<Vec<Amf0Value>, AmfError> {
        let mut values = Vec::new();
        while self.remaining() > 0 {
            values.push(self.decode()?);
        }
        Ok(values)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], AmfError> {
        if self.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, AmfError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, AmfError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, AmfError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, AmfError> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }

    fn read_utf8(&mut self) -> Result<String, AmfError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_utf8_long(&mut self) -> Result<String, AmfError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_object_properties(&mut self) -> Result<Amf0Object, AmfError> {
        let mut obj = Amf0Object::new();
        loop {
            let key = self.read_utf8()?;
            if key.is_empty() {
                let marker = self.read_u8()?;
                if marker != OBJECT_END_MARKER {
                    return Err(AmfError::InvalidMarker(marker));
                }
                return Ok(obj);
            }
            let value = self.decode()?;
            obj.insert(key, value);
        }
    }

    fn read_strict_array(&mut self) -> Result<Amf0Value, AmfError> {
        let count = self.read_u32()? as usize;
        // Every element takes at least one byte, so the remaining input caps the allocation.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(self.decode()?);
        }
        Ok(Amf0Value::StrictArray(items))
    }
}

/// Decodes a single value, returning it with the number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<(Amf0Value, usize), AmfError> {
    let mut decoder = Amf0Decoder::new(data);
    let value = decoder.decode()?;
    Ok((value, decoder.position()))
}

pub fn decode_batch(data: &[u8]) -> Result<Vec<Amf0Value>, AmfError> {
    Amf0Decoder::new(data).decode_all()
}

// ── Encoder ──

/// Encodes `value` into `out`, returning the number of bytes written.
pub fn encode<B: BufMut>(value: &Amf0Value, out: &mut B) -> Result<usize, AmfError> {
    match value {
        Amf0Value::Number(n) => {
            out.put_u8(NUMBER_MARKER);
            out.put_f64(*n);
            Ok(9)
        }
        Amf0Value::Boolean(b) => {
            out.put_u8(BOOLEAN_MARKER);
            out.put_u8(u8::from(*b));
            Ok(2)
        }
        Amf0Value::String(s) if s.len() <= STRING_MAX => {
            out.put_u8(STRING_MARKER);
            Ok(1 + write_utf8(s, out)?)
        }
        Amf0Value::String(s) => {
            let len = u32::try_from(s.len()).map_err(|_| {
                AmfError::Unencodable(format!("string of {} bytes", s.len()))
            })?;
            out.put_u8(LONG_STRING_MARKER);
            out.put_u32(len);
            out.put_slice(s.as_bytes());
            Ok(5 + s.len())
        }
        Amf0Value::Object(obj) => {
            out.put_u8(OBJECT_MARKER);
            Ok(1 + write_object_properties(obj, out)?)
        }
        Amf0Value::Null => {
            out.put_u8(NULL_MARKER);
            Ok(1)
        }
        Amf0Value::Undefined => {
            out.put_u8(UNDEFINED_MARKER);
            Ok(1)
        }
        Amf0Value::EcmaArray(obj) => {
            let count = u32::try_from(obj.len())
                .map_err(|_| AmfError::Unencodable(format!("ECMA array of {} entries", obj.len())))?;
            out.put_u8(ECMA_ARRAY_MARKER);
            out.put_u32(count);
            Ok(5 + write_object_properties(obj, out)?)
        }
        Amf0Value::StrictArray(items) => {
            let count = u32::try_from(items.len())
                .map_err(|_| AmfError::Unencodable(format!("array of {} items", items.len())))?;
            out.put_u8(STRICT_ARRAY_MARKER);
            out.put_u32(count);
            let mut n = 5;
            for item in items {
                n += encode(item, out)?;
            }
            Ok(n)
        }
        Amf0Value::Date(ms) => {
            out.put_u8(DATE_MARKER);
            out.put_f64(*ms);
            out.put_i16(0);
            Ok(11)
        }
        Amf0Value::TypedObject { class_name, object } => {
            out.put_u8(TYPED_OBJECT_MARKER);
            let n = write_utf8(class_name, out)?;
            Ok(1 + n + write_object_properties(object, out)?)
        }
    }
}

/// Encodes `values` in order. Output already written is left in place on error.
pub fn encode_batch<B: BufMut>(values: &[Amf0Value], out: &mut B) -> Result<usize, AmfError> {
    let mut n = 0;
    for value in values {
        n += encode(value, out)?;
    }
    Ok(n)
}

fn write_utf8<B: BufMut>(s: &str, out: &mut B) -> Result<usize, AmfError> {
    let len = u16::try_from(s.len())
        .map_err(|_| AmfError::Unencodable(format!("key of {} bytes", s.len())))?;
    out.put_u16(len);
    out.put_slice(s.as_bytes());
    Ok(2 + s.len())
}

fn write_object_properties<B: BufMut>(obj: &Amf0Object, out: &mut B) -> Result<usize, AmfError> {
    let mut n = 0;
    for (key, value) in obj {
        n += write_utf8(key, out)?;
        n += encode(value, out)?;
    }
    // Object end: empty key + end marker
    out.put_slice(&[0x00, 0x00, OBJECT_END_MARKER]);
    Ok(n + 3)
}
