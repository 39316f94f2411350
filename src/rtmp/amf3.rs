//! Partial AMF3 decoder, reached through the AMF0 avmplus-object escape.
//!
//! Values are mapped onto [`Amf0Value`] so callers only ever see one value type.
//! Integers become numbers, XML becomes strings, arrays with an associative part
//! become ECMA arrays. ByteArray, Vector and Dictionary are not supported.

use crate::error::AmfError;
use crate::rtmp::amf0::{Amf0Object, Amf0Value, MAX_NESTING_DEPTH};

const UNDEFINED_MARKER: u8 = 0x00;
const NULL_MARKER: u8 = 0x01;
const FALSE_MARKER: u8 = 0x02;
const TRUE_MARKER: u8 = 0x03;
const INTEGER_MARKER: u8 = 0x04;
const DOUBLE_MARKER: u8 = 0x05;
const STRING_MARKER: u8 = 0x06;
const XML_DOC_MARKER: u8 = 0x07;
const DATE_MARKER: u8 = 0x08;
const ARRAY_MARKER: u8 = 0x09;
const OBJECT_MARKER: u8 = 0x0a;
const XML_MARKER: u8 = 0x0b;
const BYTE_ARRAY_MARKER: u8 = 0x0c;
const DICTIONARY_MARKER: u8 = 0x11;

#[derive(Debug, Clone)]
struct Traits {
    class_name: String,
    dynamic: bool,
    sealed: Vec<String>,
}

pub struct Amf3Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    strings: Vec<String>,
    objects: Vec<Amf0Value>,
    traits: Vec<Traits>,
    depth: usize,
}

impl<'a> Amf3Decoder<'a> {
    /// Starts at the nesting depth already reached by the enclosing AMF0 value.
    pub fn with_depth(data: &'a [u8], depth: usize) -> Self {
        Self {
            data,
            pos: 0,
            strings: Vec::new(),
            objects: Vec::new(),
            traits: Vec::new(),
            depth,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
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
            UNDEFINED_MARKER => Ok(Amf0Value::Undefined),
            NULL_MARKER => Ok(Amf0Value::Null),
            FALSE_MARKER => Ok(Amf0Value::Boolean(false)),
            TRUE_MARKER => Ok(Amf0Value::Boolean(true)),
            INTEGER_MARKER => {
                let raw = self.read_u29()?;
                // Sign-extend the 29-bit value
                let signed = ((raw << 3) as i32) >> 3;
                Ok(Amf0Value::Number(signed as f64))
            }
            DOUBLE_MARKER => Ok(Amf0Value::Number(self.read_f64()?)),
            STRING_MARKER => Ok(Amf0Value::String(self.read_string()?)),
            XML_DOC_MARKER | XML_MARKER => self.read_xml(),
            DATE_MARKER => self.read_date(),
            ARRAY_MARKER => self.read_array(),
            OBJECT_MARKER => self.read_object(),
            BYTE_ARRAY_MARKER..=DICTIONARY_MARKER => Err(AmfError::UnsupportedType(marker)),
            _ => Err(AmfError::InvalidMarker(marker)),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], AmfError> {
        if self.data.len() - self.pos < len {
            return Err(AmfError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, AmfError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_f64(&mut self) -> Result<f64, AmfError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read_bytes(8)?);
        Ok(f64::from_be_bytes(raw))
    }

    /// Variable length unsigned 29-bit integer: up to three 7-bit groups with a
    /// continuation bit, then one full 8-bit group.
    fn read_u29(&mut self) -> Result<u32, AmfError> {
        let mut value = 0u32;
        for _ in 0..3 {
            let b = self.read_u8()?;
            value = (value << 7) | (b & 0x7f) as u32;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        let b = self.read_u8()?;
        Ok((value << 8) | b as u32)
    }

    fn read_string(&mut self) -> Result<String, AmfError> {
        let header = self.read_u29()?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .strings
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index));
        }
        let len = (header >> 1) as usize;
        let s = String::from_utf8_lossy(self.read_bytes(len)?).into_owned();
        if !s.is_empty() {
            self.strings.push(s.clone());
        }
        Ok(s)
    }

    /// Reads the U29 header shared by complex types. Returns `Err(value)` wrapped in
    /// `Ok` when the header is a reference into the object table.
    fn read_object_header(&mut self) -> Result<Result<u32, Amf0Value>, AmfError> {
        let header = self.read_u29()?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .objects
                .get(index)
                .cloned()
                .map(Err)
                .ok_or(AmfError::InvalidReference(index));
        }
        Ok(Ok(header >> 1))
    }

    /// Reserves a slot in the object table so that nested references keep their indices.
    fn reserve_object(&mut self) -> usize {
        self.objects.push(Amf0Value::Null);
        self.objects.len() - 1
    }

    fn read_xml(&mut self) -> Result<Amf0Value, AmfError> {
        let len = match self.read_object_header()? {
            Ok(len) => len as usize,
            Err(existing) => return Ok(existing),
        };
        let s = String::from_utf8_lossy(self.read_bytes(len)?).into_owned();
        let value = Amf0Value::String(s);
        self.objects.push(value.clone());
        Ok(value)
    }

    fn read_date(&mut self) -> Result<Amf0Value, AmfError> {
        if let Err(existing) = self.read_object_header()? {
            return Ok(existing);
        }
        let value = Amf0Value::Date(self.read_f64()?);
        self.objects.push(value.clone());
        Ok(value)
    }

    fn read_array(&mut self) -> Result<Amf0Value, AmfError> {
        let dense_len = match self.read_object_header()? {
            Ok(len) => len as usize,
            Err(existing) => return Ok(existing),
        };
        let slot = self.reserve_object();

        let mut assoc = Amf0Object::new();
        loop {
            let key = self.read_string()?;
            if key.is_empty() {
                break;
            }
            let value = self.decode()?;
            assoc.insert(key, value);
        }

        let mut dense = Vec::with_capacity(dense_len.min(self.data.len() - self.pos));
        for _ in 0..dense_len {
            dense.push(self.decode()?);
        }

        let value = if assoc.is_empty() {
            Amf0Value::StrictArray(dense)
        } else {
            for (i, item) in dense.into_iter().enumerate() {
                assoc.insert(i.to_string(), item);
            }
            Amf0Value::EcmaArray(assoc)
        };
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn read_traits(&mut self, header: u32) -> Result<Traits, AmfError> {
        // header here has the object-reference bit already shifted out
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .traits
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index));
        }
        if header & 2 != 0 {
            return Err(AmfError::NotImplemented("externalizable AMF3 objects"));
        }
        let dynamic = header & 4 != 0;
        let sealed_count = (header >> 3) as usize;
        let class_name = self.read_string()?;
        let mut sealed = Vec::with_capacity(sealed_count.min(self.data.len() - self.pos));
        for _ in 0..sealed_count {
            sealed.push(self.read_string()?);
        }
        let traits = Traits {
            class_name,
            dynamic,
            sealed,
        };
        self.traits.push(traits.clone());
        Ok(traits)
    }

    fn read_object(&mut self) -> Result<Amf0Value, AmfError> {
        let header = match self.read_object_header()? {
            Ok(header) => header,
            Err(existing) => return Ok(existing),
        };
        let traits = self.read_traits(header)?;
        let slot = self.reserve_object();

        let mut object = Amf0Object::new();
        for name in &traits.sealed {
            let value = self.decode()?;
            object.insert(name.clone(), value);
        }
        if traits.dynamic {
            loop {
                let key = self.read_string()?;
                if key.is_empty() {
                    break;
                }
                let value = self.decode()?;
                object.insert(key, value);
            }
        }

        let value = if traits.class_name.is_empty() {
            Amf0Value::Object(object)
        } else {
            Amf0Value::TypedObject {
                class_name: traits.class_name,
                object,
            }
        };
        self.objects[slot] = value.clone();
        Ok(value)
    }
}
