//! Serial data link between boards.
//!
//! A [`SerialDataLink`] binds local data items to names shared with a peer.
//! On the TX side it drains each item's TX queue and writes one frame with the
//! item's current value. On the RX side it accumulates transport bytes until
//! the terminator, decodes the frame and writes the values into the bound item
//! of the same name.
//!
//! # Usage
//!
//! ```ignore
//! static TX: EventChannel<4> = EventChannel::new();
//!
//! let brightness = RefCell::new(DataItem::<u8, 1>::filled("Brightness", 255).with_tx_queue(&TX));
//! let mut link: SerialDataLink<'_, Uart, 8> = SerialDataLink::new("Link", uart, LinkConfig::default());
//! link.bind(
//!     DataItemConfig::new("Brightness", ValueKind::U8, 1, Transceiver::Tx).with_tx_queue(&TX),
//!     &brightness,
//! )?;
//! ```

use core::fmt;

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::ByteTransport;
use crate::channel::{ChangeEvent, EventQueue};
use crate::data_item::{DataItemError, DataItemRef};
use crate::serializer::{
    is_valid_name, DataSerializer, DeserializeError, FrameBuffer, SerializeError,
    DEFAULT_STATS_WINDOW, MAX_MESSAGE_LENGTH,
};
use crate::setup::{SetupCallee, SetupError};
use crate::task::Task;
use crate::value::ValueKind;

/// Terminator appended to every frame unless configured otherwise
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Direction in which an item crosses the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transceiver {
    #[default]
    None,
    Tx,
    Rx,
    TxRx,
}

impl Transceiver {
    pub const fn can_tx(self) -> bool {
        matches!(self, Self::Tx | Self::TxRx)
    }

    pub const fn can_rx(self) -> bool {
        matches!(self, Self::Rx | Self::TxRx)
    }
}

/// Declarative description of one linked item
#[derive(Clone, Copy)]
pub struct DataItemConfig<'a> {
    pub name: &'a str,
    pub kind: ValueKind,
    /// Element capacity of the bound item
    pub count: usize,
    pub transceiver: Transceiver,
    pub tx_queue: Option<&'a dyn EventQueue>,
    pub rx_queue: Option<&'a dyn EventQueue>,
    /// Retransmit period when the item stays unchanged
    pub heartbeat: Option<Duration>,
}

impl<'a> DataItemConfig<'a> {
    pub const fn new(name: &'a str, kind: ValueKind, count: usize, transceiver: Transceiver) -> Self {
        Self {
            name,
            kind,
            count,
            transceiver,
            tx_queue: None,
            rx_queue: None,
            heartbeat: None,
        }
    }

    #[must_use]
    pub fn with_tx_queue(mut self, queue: &'a dyn EventQueue) -> Self {
        self.tx_queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_rx_queue(mut self, queue: &'a dyn EventQueue) -> Self {
        self.rx_queue = Some(queue);
        self
    }

    #[must_use]
    pub const fn with_heartbeat(mut self, period: Duration) -> Self {
        self.heartbeat = Some(period);
        self
    }

    pub fn tx_queue_depth(&self) -> usize {
        self.tx_queue.map_or(0, |queue| queue.capacity())
    }

    pub fn rx_queue_depth(&self) -> usize {
        self.rx_queue.map_or(0, |queue| queue.capacity())
    }
}

impl fmt::Debug for DataItemConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataItemConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("count", &self.count)
            .field("transceiver", &self.transceiver)
            .field("tx_queue_depth", &self.tx_queue_depth())
            .field("rx_queue_depth", &self.rx_queue_depth())
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Link settings
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig<'a> {
    /// Sequence that ends every frame
    pub terminator: &'a str,
    /// Longest accepted frame including the terminator, capped at
    /// [`MAX_MESSAGE_LENGTH`]
    pub max_message_length: usize,
    /// Window for deserialization failure statistics
    pub stats_window: Duration,
}

impl Default for LinkConfig<'static> {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            max_message_length: MAX_MESSAGE_LENGTH,
            stats_window: DEFAULT_STATS_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No room for another binding
    TooManyItems,
    DuplicateName,
    InvalidName,
    /// The item does not match its config's name, kind or count
    SchemaMismatch,
    UnknownItem,
    /// The item is borrowed elsewhere
    ItemBusy,
    Serialize(SerializeError),
    /// The transport accepted fewer bytes than the frame holds
    ShortWrite { written: usize, expected: usize },
}

impl From<SerializeError> for LinkError {
    fn from(err: SerializeError) -> Self {
        Self::Serialize(err)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyItems => f.write_str("link has no room for another item"),
            Self::DuplicateName => f.write_str("an item with this name is already bound"),
            Self::InvalidName => f.write_str("name cannot be framed"),
            Self::SchemaMismatch => f.write_str("item does not match its config"),
            Self::UnknownItem => f.write_str("no item with this name is bound"),
            Self::ItemBusy => f.write_str("item is busy"),
            Self::Serialize(err) => write!(f, "{}", err),
            Self::ShortWrite { written, expected } => {
                write!(f, "wrote {} of {} bytes", written, expected)
            }
        }
    }
}

/// Outcome of one [`SerialDataLink::process_rx`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Nothing was available
    Idle,
    /// Bytes were buffered but no frame is complete yet
    Pending,
    /// A frame was written into its item
    Applied { changed: bool },
    /// A frame named an item this link does not receive
    Ignored,
    Malformed(DeserializeError),
    /// The bound item refused the values
    Refused(DataItemError),
    Busy,
    /// The buffer filled without a terminator and was discarded
    Overflow,
}

struct LinkSlot<'a> {
    config: DataItemConfig<'a>,
    item: DataItemRef<'a>,
    last_tx: Option<Instant>,
}

impl LinkSlot<'_> {
    fn tx_pending(&self) -> bool {
        self.config.tx_queue.is_some_and(|queue| queue.count_waiting() > 0)
    }

    fn heartbeat_due(&self, now: Instant) -> bool {
        self.config.heartbeat.is_some_and(|period| {
            self.last_tx.is_none_or(|last| {
                now.as_millis().saturating_sub(last.as_millis()) >= period.as_millis()
            })
        })
    }

    fn tx_due(&self, now: Instant) -> bool {
        self.config.transceiver.can_tx() && (self.tx_pending() || self.heartbeat_due(now))
    }
}

/// Frame link over a byte transport
pub struct SerialDataLink<'a, X: ByteTransport, const MAX_ITEMS: usize> {
    name: &'a str,
    transport: X,
    config: LinkConfig<'a>,
    slots: Vec<LinkSlot<'a>, MAX_ITEMS>,
    rx_buffer: Vec<u8, MAX_MESSAGE_LENGTH>,
    tx_buffer: FrameBuffer,
    serializer: DataSerializer,
    overflow_count: u32,
    frames_sent: u32,
    frames_received: u32,
}

impl<'a, X: ByteTransport, const MAX_ITEMS: usize> SerialDataLink<'a, X, MAX_ITEMS> {
    pub fn new(name: &'a str, transport: X, config: LinkConfig<'a>) -> Self {
        debug_assert!(!config.terminator.is_empty(), "terminator must not be empty");
        debug_assert!(
            config.max_message_length <= MAX_MESSAGE_LENGTH,
            "max message length above {}",
            MAX_MESSAGE_LENGTH
        );
        let config = LinkConfig {
            terminator: if config.terminator.is_empty() {
                DEFAULT_TERMINATOR
            } else {
                config.terminator
            },
            max_message_length: config.max_message_length.min(MAX_MESSAGE_LENGTH),
            ..config
        };
        Self {
            name,
            transport,
            serializer: DataSerializer::new(config.stats_window),
            config,
            slots: Vec::new(),
            rx_buffer: Vec::new(),
            tx_buffer: FrameBuffer::new(),
            overflow_count: 0,
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// Bind `item` to the slot described by `config`
    pub fn bind(&mut self, config: DataItemConfig<'a>, item: DataItemRef<'a>) -> Result<(), LinkError> {
        if !is_valid_name(config.name) {
            return Err(LinkError::InvalidName);
        }
        if self.slots.iter().any(|slot| slot.config.name == config.name) {
            return Err(LinkError::DuplicateName);
        }
        {
            let item = item.try_borrow().map_err(|_| LinkError::ItemBusy)?;
            if item.name() != config.name
                || item.kind() != config.kind
                || item.capacity() != config.count
            {
                log_error!("\"{}\": item does not match its config", config.name);
                return Err(LinkError::SchemaMismatch);
            }
        }
        log_debug!(
            "{}: bound \"{}\" ({}x{})",
            self.name,
            config.name,
            config.count,
            config.kind.as_str()
        );
        self.slots
            .push(LinkSlot {
                config,
                item,
                last_tx: None,
            })
            .map_err(|_| LinkError::TooManyItems)
    }

    pub fn unbind(&mut self, name: &str) -> bool {
        match self.slots.iter().position(|slot| slot.config.name == name) {
            Some(index) => {
                self.slots.remove(index);
                true
            }
            None => false,
        }
    }

    /// Consume the bytes available right now, stopping after one frame
    pub fn process_rx(&mut self, now: Instant) -> RxStatus {
        let available = self.transport.available();
        if available == 0 {
            return RxStatus::Idle;
        }

        for _ in 0..available {
            let Some(byte) = self.transport.read() else {
                break;
            };
            if self.rx_buffer.push(byte).is_err() {
                return self.discard_overflow();
            }
            let terminator = self.config.terminator.as_bytes();
            if self.rx_buffer.ends_with(terminator) {
                let frame = core::mem::take(&mut self.rx_buffer);
                let body = frame[..frame.len() - terminator.len()].trim_ascii();
                return self.handle_frame(now, body);
            }
            if self.rx_buffer.len() >= self.config.max_message_length {
                return self.discard_overflow();
            }
        }
        RxStatus::Pending
    }

    /// Send every item with pending change events or a due heartbeat.
    /// Returns the number of frames written.
    pub fn process_tx(&mut self, now: Instant) -> usize {
        let mut sent = 0;
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if !slot.tx_due(now) {
                continue;
            }
            if let Some(queue) = slot.config.tx_queue {
                queue.drain();
            }
            match self.transmit(index, now) {
                Ok(()) => sent += 1,
                Err(err) => log_warn!(
                    "{}: tx \"{}\" failed: {}",
                    self.name,
                    self.slots[index].config.name,
                    err
                ),
            }
        }
        sent
    }

    /// Send the current value of `name` regardless of pending events
    pub fn send_now(&mut self, name: &str, now: Instant) -> Result<(), LinkError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.config.name == name)
            .ok_or(LinkError::UnknownItem)?;
        self.transmit(index, now)
    }

    /// Whether any transmit-capable item has work for `process_tx`
    pub fn tx_pending(&self, now: Instant) -> bool {
        self.slots.iter().any(|slot| slot.tx_due(now))
    }

    pub fn item_count(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &LinkConfig<'a> {
        &self.config
    }

    /// Receive buffers discarded for lack of a terminator
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    /// Frames that decoded successfully
    pub fn frames_received(&self) -> u32 {
        self.frames_received
    }

    pub fn serializer(&self) -> &DataSerializer {
        &self.serializer
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut X {
        &mut self.transport
    }

    fn discard_overflow(&mut self) -> RxStatus {
        log_warn!(
            "{}: rx buffer reached {} bytes without terminator, discarding",
            self.name,
            self.rx_buffer.len()
        );
        self.rx_buffer.clear();
        self.overflow_count = self.overflow_count.saturating_add(1);
        RxStatus::Overflow
    }

    fn handle_frame(&mut self, now: Instant, frame: &[u8]) -> RxStatus {
        let decoded = match self.serializer.deserialize_bytes(now, frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                log_warn!("{}: dropped frame: {}", self.name, err);
                return RxStatus::Malformed(err);
            }
        };
        self.frames_received = self.frames_received.saturating_add(1);

        let Some(slot) = self
            .slots
            .iter()
            .find(|slot| slot.config.name == decoded.name)
        else {
            log_debug!("{}: ignoring unknown item \"{}\"", self.name, decoded.name);
            return RxStatus::Ignored;
        };
        if !slot.config.transceiver.can_rx() {
            log_debug!("{}: \"{}\" is not received", self.name, decoded.name);
            return RxStatus::Ignored;
        }
        if decoded.kind != slot.config.kind {
            let err = DataItemError::KindMismatch {
                expected: slot.config.kind,
                found: decoded.kind,
            };
            log_warn!("{}: \"{}\" refused frame: {}", self.name, decoded.name, err);
            return RxStatus::Refused(err);
        }

        let Ok(mut item) = slot.item.try_borrow_mut() else {
            log_warn!("{}: \"{}\" is busy, dropping frame", self.name, decoded.name);
            return RxStatus::Busy;
        };
        match item.apply_values(&decoded.values) {
            Ok(changed) => {
                if changed {
                    if let Some(queue) = slot.config.rx_queue {
                        if queue.try_enqueue(ChangeEvent::new(item.change_count())).is_err() {
                            log_debug!("\"{}\": rx queue full", decoded.name);
                        }
                    }
                }
                RxStatus::Applied { changed }
            }
            Err(err) => {
                log_warn!("{}: \"{}\" refused values: {}", self.name, decoded.name, err);
                RxStatus::Refused(err)
            }
        }
    }

    fn transmit(&mut self, index: usize, now: Instant) -> Result<(), LinkError> {
        let slot = &self.slots[index];
        {
            let item = slot.item.try_borrow().map_err(|_| LinkError::ItemBusy)?;
            self.serializer.serialize(&*item, &mut self.tx_buffer)?;
        }
        let terminator = self.config.terminator;
        let expected = self.tx_buffer.len() + terminator.len();
        if expected > self.config.max_message_length {
            return Err(LinkError::Serialize(SerializeError::FrameTooLong));
        }

        let mut written = self.transport.write(self.tx_buffer.as_bytes());
        written += self.transport.write(terminator.as_bytes());
        self.slots[index].last_tx = Some(now);
        if written != expected {
            return Err(LinkError::ShortWrite { written, expected });
        }
        self.frames_sent = self.frames_sent.saturating_add(1);
        Ok(())
    }
}

impl<X: ByteTransport, const MAX_ITEMS: usize> SetupCallee for SerialDataLink<'_, X, MAX_ITEMS> {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.slots.is_empty() {
            log_warn!("{}: no items bound", self.name);
        }
        self.rx_buffer.clear();
        log_info!("{}: link ready with {} items", self.name, self.slots.len());
        Ok(())
    }
}

impl<X: ByteTransport, const MAX_ITEMS: usize> Task for SerialDataLink<'_, X, MAX_ITEMS> {
    fn can_run(&self) -> bool {
        self.transport.available() > 0 || self.tx_pending(Instant::now())
    }

    fn run_once(&mut self) {
        let now = Instant::now();
        if self.transport.available() > 0 {
            // failures are logged where they are detected
            self.process_rx(now);
        }
        self.process_tx(now);
    }
}
