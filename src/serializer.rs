//! Text wire format for data items.
//!
//! One frame carries the whole value of one item:
//!
//! ```text
//! name,kind,count,bytes,hex_0,...,hex_{count-1},checksum
//! ```
//!
//! `hex_i` is the upper-case hex of element `i`'s little-endian bytes,
//! `bytes` the total number of element bytes and `checksum` their sum. The
//! terminator is appended by the link, not by the serializer.

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::data_item::DynDataItem;
use crate::value::{ElementBytes, ElementOverflow, Value, ValueKind, MAX_ELEMENT_BYTES};

/// Upper bound of one frame including its terminator
pub const MAX_MESSAGE_LENGTH: usize = 500;

/// Most elements a single frame may carry
pub const MAX_VALUE_COUNT: usize = 16;

pub const FIELD_DIVIDER: char = ',';

/// Window over which deserialization failures are counted
pub const DEFAULT_STATS_WINDOW: Duration = Duration::from_secs(5);

pub type FrameBuffer = String<MAX_MESSAGE_LENGTH>;
pub type ValueSet = Vec<Value, MAX_VALUE_COUNT>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeError {
    /// Empty name, surrounding whitespace, or a field divider or line break inside
    InvalidName,
    TooManyValues,
    /// An element could not be read from the item
    MissingValue(usize),
    ElementTooLarge,
    /// The frame does not fit the output buffer
    FrameTooLong,
}

impl From<ElementOverflow> for SerializeError {
    fn from(_: ElementOverflow) -> Self {
        Self::ElementTooLarge
    }
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => f.write_str("name cannot be framed"),
            Self::TooManyValues => write!(f, "more than {} values", MAX_VALUE_COUNT),
            Self::MissingValue(index) => write!(f, "no value at index {}", index),
            Self::ElementTooLarge => write!(f, "element exceeds {} bytes", MAX_ELEMENT_BYTES),
            Self::FrameTooLong => f.write_str("frame too long"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializeError {
    MissingField,
    UnknownKind,
    BadNumber,
    TooManyValues,
    CountMismatch { expected: usize, found: usize },
    ByteCountMismatch { expected: usize, found: usize },
    BadHex,
    /// Element bytes do not form a value of the frame's kind
    BadElement(usize),
    ChecksumMismatch { expected: u32, computed: u32 },
    InvalidUtf8,
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField => f.write_str("missing field"),
            Self::UnknownKind => f.write_str("unknown value kind"),
            Self::BadNumber => f.write_str("malformed number"),
            Self::TooManyValues => write!(f, "more than {} values", MAX_VALUE_COUNT),
            Self::CountMismatch { expected, found } => {
                write!(f, "expected {} values, found {}", expected, found)
            }
            Self::ByteCountMismatch { expected, found } => {
                write!(f, "expected {} bytes, found {}", expected, found)
            }
            Self::BadHex => f.write_str("malformed hex field"),
            Self::BadElement(index) => write!(f, "bad element at index {}", index),
            Self::ChecksumMismatch { expected, computed } => {
                write!(f, "checksum {} does not match computed {}", expected, computed)
            }
            Self::InvalidUtf8 => f.write_str("frame is not valid utf-8"),
        }
    }
}

/// Frame decoded from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame<'f> {
    pub name: &'f str,
    pub kind: ValueKind,
    pub values: ValueSet,
}

/// Whether `name` can appear as the first field of a frame
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name
            .chars()
            .any(|c| c == FIELD_DIVIDER || c.is_ascii_control())
}

/// Encode `values` into `out`, replacing its contents
pub fn encode_frame<const CAP: usize>(
    name: &str,
    kind: ValueKind,
    values: &[Value],
    out: &mut String<CAP>,
) -> Result<(), SerializeError> {
    out.clear();
    if !is_valid_name(name) {
        return Err(SerializeError::InvalidName);
    }
    if values.len() > MAX_VALUE_COUNT {
        return Err(SerializeError::TooManyValues);
    }

    let mut bytes = ElementBytes::new();
    let mut total = 0usize;
    let mut checksum = 0u32;
    for value in values {
        bytes.clear();
        value.write_bytes(&mut bytes)?;
        total += bytes.len();
        checksum = bytes
            .iter()
            .fold(checksum, |sum, byte| sum.wrapping_add(u32::from(*byte)));
    }

    let too_long = |_| SerializeError::FrameTooLong;
    write!(out, "{},{},{},{}", name, kind.as_str(), values.len(), total).map_err(too_long)?;
    for value in values {
        bytes.clear();
        value.write_bytes(&mut bytes)?;
        out.push(FIELD_DIVIDER).map_err(|()| SerializeError::FrameTooLong)?;
        for byte in &bytes {
            write!(out, "{:02X}", byte).map_err(too_long)?;
        }
    }
    write!(out, ",{}", checksum).map_err(too_long)
}

/// Decode one frame, without its terminator
pub fn decode_frame(frame: &str) -> Result<DecodedFrame<'_>, DeserializeError> {
    let mut fields = frame.split(FIELD_DIVIDER);

    let name = fields
        .next()
        .filter(|name| !name.is_empty())
        .ok_or(DeserializeError::MissingField)?;
    let kind = fields
        .next()
        .ok_or(DeserializeError::MissingField)
        .and_then(|kind| ValueKind::parse_from_str(kind).ok_or(DeserializeError::UnknownKind))?;
    let count = parse_field::<usize>(fields.next())?;
    let byte_count = parse_field::<usize>(fields.next())?;

    // Element fields followed by the checksum
    let mut rest: Vec<&str, { MAX_VALUE_COUNT + 1 }> = Vec::new();
    for field in fields {
        rest.push(field)
            .map_err(|_| DeserializeError::TooManyValues)?;
    }
    let (checksum_field, elements) = rest.split_last().ok_or(DeserializeError::MissingField)?;
    if elements.len() != count {
        return Err(DeserializeError::CountMismatch {
            expected: count,
            found: elements.len(),
        });
    }

    let mut values = ValueSet::new();
    let mut bytes = ElementBytes::new();
    let mut total = 0usize;
    let mut computed = 0u32;
    for (index, field) in elements.iter().enumerate() {
        decode_hex(field, &mut bytes)?;
        total += bytes.len();
        computed = bytes
            .iter()
            .fold(computed, |sum, byte| sum.wrapping_add(u32::from(*byte)));
        let value = Value::from_bytes(kind, &bytes).ok_or(DeserializeError::BadElement(index))?;
        values
            .push(value)
            .map_err(|_| DeserializeError::TooManyValues)?;
    }

    if total != byte_count {
        return Err(DeserializeError::ByteCountMismatch {
            expected: byte_count,
            found: total,
        });
    }
    let expected = parse_field::<u32>(Some(*checksum_field))?;
    if expected != computed {
        return Err(DeserializeError::ChecksumMismatch { expected, computed });
    }

    Ok(DecodedFrame { name, kind, values })
}

fn parse_field<N: core::str::FromStr>(field: Option<&str>) -> Result<N, DeserializeError> {
    field
        .ok_or(DeserializeError::MissingField)?
        .parse()
        .map_err(|_| DeserializeError::BadNumber)
}

fn decode_hex(field: &str, out: &mut ElementBytes) -> Result<(), DeserializeError> {
    out.clear();
    if field.len() % 2 != 0 {
        return Err(DeserializeError::BadHex);
    }
    for pair in field.as_bytes().chunks(2) {
        let high = hex_digit(pair[0]).ok_or(DeserializeError::BadHex)?;
        let low = hex_digit(pair[1]).ok_or(DeserializeError::BadHex)?;
        out.push((high << 4) | low)
            .map_err(|_| DeserializeError::BadHex)?;
    }
    Ok(())
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Failure counts of one elapsed statistics window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureReport {
    pub total: u32,
    pub failed: u32,
}

impl FailureReport {
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f32 * 100.0 / self.total as f32
    }
}

/// Rolling count of deserialization attempts and failures
#[derive(Debug, Clone, Copy)]
pub struct DeserializeStats {
    window: Duration,
    window_start: Option<Instant>,
    total: u32,
    failed: u32,
}

impl DeserializeStats {
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            total: 0,
            failed: 0,
        }
    }

    /// Count one attempt. Returns the window's report once it has elapsed.
    pub fn record(&mut self, now: Instant, success: bool) -> Option<FailureReport> {
        let start = *self.window_start.get_or_insert(now);
        self.total = self.total.saturating_add(1);
        if !success {
            self.failed = self.failed.saturating_add(1);
        }

        if now.as_millis().saturating_sub(start.as_millis()) < self.window.as_millis() {
            return None;
        }
        let report = FailureReport {
            total: self.total,
            failed: self.failed,
        };
        self.window_start = Some(now);
        self.total = 0;
        self.failed = 0;
        Some(report)
    }

    /// Attempts counted in the current window
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }
}

impl Default for DeserializeStats {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}

/// Frame codec with failure statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSerializer {
    stats: DeserializeStats,
}

impl DataSerializer {
    pub const fn new(stats_window: Duration) -> Self {
        Self {
            stats: DeserializeStats::new(stats_window),
        }
    }

    /// Encode the current value of `item` into `out`
    pub fn serialize<const CAP: usize>(
        &self,
        item: &dyn DynDataItem,
        out: &mut String<CAP>,
    ) -> Result<(), SerializeError> {
        let mut values = ValueSet::new();
        for index in 0..item.count() {
            let value = item
                .value_at(index)
                .ok_or(SerializeError::MissingValue(index))?;
            values
                .push(value)
                .map_err(|_| SerializeError::TooManyValues)?;
        }
        encode_frame(item.name(), item.kind(), &values, out)
    }

    /// Decode `frame` and count the attempt
    pub fn deserialize<'f>(
        &mut self,
        now: Instant,
        frame: &'f str,
    ) -> Result<DecodedFrame<'f>, DeserializeError> {
        self.record(now, decode_frame(frame))
    }

    /// Same as [`DataSerializer::deserialize`] for a frame still in raw bytes
    pub fn deserialize_bytes<'f>(
        &mut self,
        now: Instant,
        frame: &'f [u8],
    ) -> Result<DecodedFrame<'f>, DeserializeError> {
        let decoded = core::str::from_utf8(frame)
            .map_err(|_| DeserializeError::InvalidUtf8)
            .and_then(decode_frame);
        self.record(now, decoded)
    }

    fn record<'f>(
        &mut self,
        now: Instant,
        decoded: Result<DecodedFrame<'f>, DeserializeError>,
    ) -> Result<DecodedFrame<'f>, DeserializeError> {
        if let Some(report) = self.stats.record(now, decoded.is_ok()) {
            if report.failed > 0 {
                log_warn!(
                    "deserialize failures: {} of {} ({}%)",
                    report.failed,
                    report.total,
                    report.failure_percent()
                );
            }
        }
        decoded
    }

    pub fn stats(&self) -> &DeserializeStats {
        &self.stats
    }
}
