#![no_std]

#[macro_use]
mod log;

pub mod channel;
pub mod data_item;
pub mod event;
pub mod link;
pub mod preferences;
pub mod serializer;
pub mod setup;
pub mod task;
pub mod validity;
pub mod value;

pub use channel::{ChangeEvent, Channel, EventChannel, EventQueue, TryReceiveError, TrySendError};
pub use data_item::{
    CallbackRegistry, DataItem, DataItemError, DataItemRef, DynDataItem, MAX_NAMED_CALLBACKS,
    NamedCallback, StringDataItem,
};
pub use event::{EventCallee, EventCalleeRef, EventCaller, EventRegistryFull};
pub use link::{
    DEFAULT_TERMINATOR, DataItemConfig, LinkConfig, LinkError, RxStatus, SerialDataLink,
    Transceiver,
};
pub use preferences::{
    LoadOutcome, PREFERENCE_TIMEOUT, PreferenceError, PreferenceManager, PreferenceStore,
    PreferenceTask, PreferenceText, SaveOutcome,
};
pub use serializer::{
    DataSerializer, DecodedFrame, DeserializeError, MAX_MESSAGE_LENGTH, MAX_VALUE_COUNT,
    SerializeError,
};
pub use setup::{SetupCallee, SetupCalleeRef, SetupCaller, SetupError};
pub use task::{Task, TaskError, TaskId, TaskScheduler};
pub use validity::{Comparator, ValidValueChecker, ValueComparator};
pub use value::{DATAITEM_STRING_LENGTH, DataValue, Frame, Rgb, Value, ValueKind};
pub use embassy_time::{Duration, Instant};

/// Abstract serial port
///
/// Implement this trait for each UART or other byte stream the link runs on.
/// No method may block.
pub trait ByteTransport {
    /// Bytes that can be read right now
    fn available(&self) -> usize;

    /// Read one byte, `None` when nothing is buffered
    fn read(&mut self) -> Option<u8>;

    /// Write `bytes`, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> usize;
}
