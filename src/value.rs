//! Value kinds exchanged between boards.
//!
//! [`Value`] is the tagged union carried by frames and handed to data items,
//! [`DataValue`] ties a Rust element type to its kind and its string form.

use core::fmt::{self, Write};

use heapless::{String, Vec};
use smart_leds::RGB8;

/// Capacity of string data items and text values
pub const DATAITEM_STRING_LENGTH: usize = 50;

/// Largest encoded element (a full text value)
pub const MAX_ELEMENT_BYTES: usize = DATAITEM_STRING_LENGTH;

/// Divider between elements in the string form of a multi-element item
pub const ENCODE_DIVIDER: char = '|';

pub type Rgb = RGB8;
pub type TextValue = String<DATAITEM_STRING_LENGTH>;
pub type ElementBytes = Vec<u8, MAX_ELEMENT_BYTES>;

const KIND_NAME_BOOL: &str = "bool";
const KIND_NAME_I8: &str = "i8";
const KIND_NAME_I16: &str = "i16";
const KIND_NAME_I32: &str = "i32";
const KIND_NAME_U8: &str = "u8";
const KIND_NAME_U16: &str = "u16";
const KIND_NAME_U32: &str = "u32";
const KIND_NAME_CHAR: &str = "char";
const KIND_NAME_F32: &str = "f32";
const KIND_NAME_F64: &str = "f64";
const KIND_NAME_RGB: &str = "rgb";
const KIND_NAME_FRAME: &str = "frame";
const KIND_NAME_TEXT: &str = "text";

/// One stereo sample pair from the sound board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    pub channel1: i16,
    pub channel2: i16,
}

impl Frame {
    pub const fn new(channel1: i16, channel2: i16) -> Self {
        Self { channel1, channel2 }
    }
}

/// Kind tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    Char,
    F32,
    F64,
    Rgb,
    Frame,
    Text,
}

impl ValueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => KIND_NAME_BOOL,
            Self::I8 => KIND_NAME_I8,
            Self::I16 => KIND_NAME_I16,
            Self::I32 => KIND_NAME_I32,
            Self::U8 => KIND_NAME_U8,
            Self::U16 => KIND_NAME_U16,
            Self::U32 => KIND_NAME_U32,
            Self::Char => KIND_NAME_CHAR,
            Self::F32 => KIND_NAME_F32,
            Self::F64 => KIND_NAME_F64,
            Self::Rgb => KIND_NAME_RGB,
            Self::Frame => KIND_NAME_FRAME,
            Self::Text => KIND_NAME_TEXT,
        }
    }

    pub fn parse_from_str(s: &str) -> Option<Self> {
        Some(match s {
            KIND_NAME_BOOL => Self::Bool,
            KIND_NAME_I8 => Self::I8,
            KIND_NAME_I16 => Self::I16,
            KIND_NAME_I32 => Self::I32,
            KIND_NAME_U8 => Self::U8,
            KIND_NAME_U16 => Self::U16,
            KIND_NAME_U32 => Self::U32,
            KIND_NAME_CHAR => Self::Char,
            KIND_NAME_F32 => Self::F32,
            KIND_NAME_F64 => Self::F64,
            KIND_NAME_RGB => Self::Rgb,
            KIND_NAME_FRAME => Self::Frame,
            KIND_NAME_TEXT => Self::Text,
            _ => return None,
        })
    }

    /// Encoded width of one element, `None` for variable width text
    pub const fn byte_width(self) -> Option<usize> {
        match self {
            Self::Bool | Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::Char | Self::F32 | Self::Frame => Some(4),
            Self::Rgb => Some(3),
            Self::F64 => Some(8),
            Self::Text => None,
        }
    }
}

/// Error produced when encoding a value into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementOverflow;

/// A single element of any supported kind
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    Char(char),
    F32(f32),
    F64(f64),
    Rgb(Rgb),
    Frame(Frame),
    Text(TextValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::I8(_) => ValueKind::I8,
            Self::I16(_) => ValueKind::I16,
            Self::I32(_) => ValueKind::I32,
            Self::U8(_) => ValueKind::U8,
            Self::U16(_) => ValueKind::U16,
            Self::U32(_) => ValueKind::U32,
            Self::Char(_) => ValueKind::Char,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
            Self::Rgb(_) => ValueKind::Rgb,
            Self::Frame(_) => ValueKind::Frame,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Append the little-endian bytes of this element to `out`
    pub fn write_bytes(&self, out: &mut ElementBytes) -> Result<(), ElementOverflow> {
        let pushed = match self {
            Self::Bool(v) => out.push(u8::from(*v)).map_err(|_| ()),
            Self::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U8(v) => out.push(*v).map_err(|_| ()),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Char(v) => out.extend_from_slice(&u32::from(*v).to_le_bytes()),
            Self::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Rgb(v) => out.extend_from_slice(&[v.r, v.g, v.b]),
            Self::Frame(v) => out
                .extend_from_slice(&v.channel1.to_le_bytes())
                .and_then(|()| out.extend_from_slice(&v.channel2.to_le_bytes())),
            Self::Text(v) => out.extend_from_slice(v.as_bytes()),
        };
        pushed.map_err(|()| ElementOverflow)
    }

    /// Rebuild an element of `kind` from its little-endian bytes
    pub fn from_bytes(kind: ValueKind, bytes: &[u8]) -> Option<Self> {
        if let Some(width) = kind.byte_width() {
            if bytes.len() != width {
                return None;
            }
        }
        Some(match kind {
            ValueKind::Bool => match bytes[0] {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                _ => return None,
            },
            ValueKind::I8 => Self::I8(i8::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::I16 => Self::I16(i16::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::I32 => Self::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::U8 => Self::U8(bytes[0]),
            ValueKind::U16 => Self::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::U32 => Self::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::Char => {
                Self::Char(char::from_u32(u32::from_le_bytes(bytes.try_into().ok()?))?)
            }
            ValueKind::F32 => Self::F32(f32::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::F64 => Self::F64(f64::from_le_bytes(bytes.try_into().ok()?)),
            ValueKind::Rgb => Self::Rgb(Rgb::new(bytes[0], bytes[1], bytes[2])),
            ValueKind::Frame => Self::Frame(Frame::new(
                i16::from_le_bytes([bytes[0], bytes[1]]),
                i16::from_le_bytes([bytes[2], bytes[3]]),
            )),
            ValueKind::Text => {
                let text = core::str::from_utf8(bytes).ok()?;
                Self::Text(TextValue::try_from(text).ok()?)
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => v.encode(f),
            Self::I8(v) => v.encode(f),
            Self::I16(v) => v.encode(f),
            Self::I32(v) => v.encode(f),
            Self::U8(v) => v.encode(f),
            Self::U16(v) => v.encode(f),
            Self::U32(v) => v.encode(f),
            Self::Char(v) => v.encode(f),
            Self::F32(v) => v.encode(f),
            Self::F64(v) => v.encode(f),
            Self::Rgb(v) => v.encode(f),
            Self::Frame(v) => v.encode(f),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Element type storable in a [`DataItem`](crate::DataItem).
///
/// The string form is what validators and preferences see; the byte form
/// (through [`Value`]) is what travels on the wire.
pub trait DataValue: Copy + Default {
    const KIND: ValueKind;

    fn to_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;

    /// Write the string form of the element
    fn encode(&self, out: &mut dyn Write) -> fmt::Result;

    /// Parse the string form of the element
    fn decode(text: &str) -> Option<Self>;

    /// Byte-wise equality, used for change detection
    fn same_bits(&self, other: &Self) -> bool;
}

macro_rules! impl_integer_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl DataValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn to_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }

                fn encode(&self, out: &mut dyn Write) -> fmt::Result {
                    write!(out, "{}", self)
                }

                fn decode(text: &str) -> Option<Self> {
                    text.trim().parse().ok()
                }

                fn same_bits(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_integer_value!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    u8 => U8,
    u16 => U16,
    u32 => U32,
);

macro_rules! impl_float_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl DataValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn to_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }

                fn encode(&self, out: &mut dyn Write) -> fmt::Result {
                    write!(out, "{}", self)
                }

                fn decode(text: &str) -> Option<Self> {
                    text.trim().parse().ok()
                }

                fn same_bits(&self, other: &Self) -> bool {
                    self.to_bits() == other.to_bits()
                }
            }
        )*
    };
}

impl_float_value!(f32 => F32, f64 => F64);

impl DataValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn encode(&self, out: &mut dyn Write) -> fmt::Result {
        out.write_str(if *self { "1" } else { "0" })
    }

    fn decode(text: &str) -> Option<Self> {
        match text.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        }
    }

    fn same_bits(&self, other: &Self) -> bool {
        self == other
    }
}

impl DataValue for char {
    const KIND: ValueKind = ValueKind::Char;

    fn to_value(self) -> Value {
        Value::Char(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Char(v) => Some(*v),
            _ => None,
        }
    }

    fn encode(&self, out: &mut dyn Write) -> fmt::Result {
        out.write_char(*self)
    }

    fn decode(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let first = chars.next()?;
        chars.next().is_none().then_some(first)
    }

    fn same_bits(&self, other: &Self) -> bool {
        self == other
    }
}

impl DataValue for Rgb {
    const KIND: ValueKind = ValueKind::Rgb;

    fn to_value(self) -> Value {
        Value::Rgb(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Rgb(v) => Some(*v),
            _ => None,
        }
    }

    /// `#RRGGBB`
    fn encode(&self, out: &mut dyn Write) -> fmt::Result {
        write!(out, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    fn decode(text: &str) -> Option<Self> {
        let hex = text.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let rgb = u32::from_str_radix(hex, 16).ok()?;
        let [_, r, g, b] = rgb.to_be_bytes();
        Some(Rgb::new(r, g, b))
    }

    fn same_bits(&self, other: &Self) -> bool {
        self == other
    }
}

impl DataValue for Frame {
    const KIND: ValueKind = ValueKind::Frame;

    fn to_value(self) -> Value {
        Value::Frame(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Frame(v) => Some(*v),
            _ => None,
        }
    }

    /// `channel1:channel2`
    fn encode(&self, out: &mut dyn Write) -> fmt::Result {
        write!(out, "{}:{}", self.channel1, self.channel2)
    }

    fn decode(text: &str) -> Option<Self> {
        let (channel1, channel2) = text.trim().split_once(':')?;
        Some(Self::new(channel1.parse().ok()?, channel2.parse().ok()?))
    }

    fn same_bits(&self, other: &Self) -> bool {
        self == other
    }
}
