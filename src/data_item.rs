//! Change-tracked data cells.
//!
//! A data item owns a bounded value, counts accepted writes and fans every
//! accepted change out to its named callbacks and, optionally, to a TX event
//! queue read by the serial link.

use core::cell::RefCell;
use core::fmt::{self, Write};

use heapless::{String, Vec};

use crate::channel::{ChangeEvent, EventQueue};
use crate::setup::{SetupCallee, SetupError};
use crate::validity::ValidValueChecker;
use crate::value::{
    DATAITEM_STRING_LENGTH, DataValue, ENCODE_DIVIDER, TextValue, Value, ValueKind,
};

/// Maximum number of callbacks per item
pub const MAX_NAMED_CALLBACKS: usize = 8;

/// Scratch size for the string form of one element during validation
const ELEMENT_TEXT_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemError {
    /// More elements than the item can hold
    TooManyValues { count: usize, capacity: usize },
    /// Rejected by the item's validator
    InvalidValue,
    /// String form could not be parsed
    Decode,
    /// Value of the wrong kind for this item
    KindMismatch { expected: ValueKind, found: ValueKind },
    /// A callback with the same name is already registered
    DuplicateCallback,
    CallbackRegistryFull,
}

impl fmt::Display for DataItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyValues { count, capacity } => {
                write!(f, "{} values exceed capacity {}", count, capacity)
            }
            Self::InvalidValue => f.write_str("value rejected by validator"),
            Self::Decode => f.write_str("value could not be decoded"),
            Self::KindMismatch { expected, found } => {
                write!(f, "expected {} value, found {}", expected.as_str(), found.as_str())
            }
            Self::DuplicateCallback => f.write_str("callback name already registered"),
            Self::CallbackRegistryFull => f.write_str("callback registry is full"),
        }
    }
}

/// Callback invoked with the item name and its new value.
///
/// Context is whatever the closure captures.
pub struct NamedCallback<'a, V: ?Sized> {
    pub name: &'a str,
    pub callback: &'a dyn Fn(&str, &V),
}

impl<'a, V: ?Sized> NamedCallback<'a, V> {
    pub const fn new(name: &'a str, callback: &'a dyn Fn(&str, &V)) -> Self {
        Self { name, callback }
    }
}

impl<V: ?Sized> Clone for NamedCallback<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: ?Sized> Copy for NamedCallback<'_, V> {}

/// Ordered set of callbacks keyed by name
pub struct CallbackRegistry<'a, V: ?Sized> {
    callbacks: Vec<NamedCallback<'a, V>, MAX_NAMED_CALLBACKS>,
}

impl<'a, V: ?Sized> CallbackRegistry<'a, V> {
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn register(&mut self, callback: NamedCallback<'a, V>) -> Result<(), DataItemError> {
        if self.callbacks.iter().any(|existing| existing.name == callback.name) {
            log_error!("callback \"{}\" already registered", callback.name);
            return Err(DataItemError::DuplicateCallback);
        }
        self.callbacks
            .push(callback)
            .map_err(|_| DataItemError::CallbackRegistryFull)
    }

    /// Remove the callback named `name`, keeping the order of the rest
    pub fn deregister(&mut self, name: &str) -> bool {
        match self.callbacks.iter().position(|callback| callback.name == name) {
            Some(index) => {
                self.callbacks.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn call(&self, item_name: &str, value: &V) {
        for callback in &self.callbacks {
            log_debug!("\"{}\": calling \"{}\"", item_name, callback.name);
            (callback.callback)(item_name, value);
        }
    }
}

impl<V: ?Sized> Default for CallbackRegistry<'_, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind-erased view of a data item.
///
/// This is what the serial link and the preference manager work with.
pub trait DynDataItem {
    fn name(&self) -> &str;

    fn kind(&self) -> ValueKind;

    /// Maximum number of elements
    fn capacity(&self) -> usize;

    /// Current number of elements
    fn count(&self) -> usize;

    fn change_count(&self) -> u32;

    fn value_at(&self, index: usize) -> Option<Value>;

    /// Replace the value with decoded elements, as received from a peer
    fn apply_values(&mut self, values: &[Value]) -> Result<bool, DataItemError>;

    /// Write the `|`-joined string form of the current value
    fn write_value_str(&self, out: &mut dyn Write) -> fmt::Result;

    /// Write the `|`-joined string form of the initial value
    fn write_initial_value_str(&self, out: &mut dyn Write) -> fmt::Result;

    fn set_value_from_str(&mut self, text: &str) -> Result<bool, DataItemError>;
}

/// Shared handle to a type-erased item
pub type DataItemRef<'a> = &'a RefCell<dyn DynDataItem + 'a>;

fn signal_change(queue: Option<&dyn EventQueue>, name: &str, change_count: u32) {
    if let Some(queue) = queue {
        if queue.try_enqueue(ChangeEvent::new(change_count)).is_err() {
            // A pending event already makes the link send the latest value
            log_debug!("\"{}\": tx queue full", name);
        }
    }
}

fn write_joined<T: DataValue>(values: &[T], out: &mut dyn Write) -> fmt::Result {
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.write_char(ENCODE_DIVIDER)?;
        }
        value.encode(out)?;
    }
    Ok(())
}

/// Typed data item holding up to `N` elements of `T`
pub struct DataItem<'a, T: DataValue, const N: usize> {
    name: &'a str,
    initial: Vec<T, N>,
    value: Vec<T, N>,
    change_count: u32,
    callbacks: CallbackRegistry<'a, [T]>,
    checker: ValidValueChecker<'a>,
    tx_queue: Option<&'a dyn EventQueue>,
}

impl<'a, T: DataValue, const N: usize> DataItem<'a, T, N> {
    /// Create an item whose initial value is `initial`.
    ///
    /// Elements beyond `N` are a contract violation; release builds drop them.
    pub fn new(name: &'a str, initial: &[T]) -> Self {
        debug_assert!(
            initial.len() <= N,
            "initial value exceeds item capacity"
        );
        let initial: Vec<T, N> = initial.iter().take(N).copied().collect();
        Self {
            name,
            value: initial.clone(),
            initial,
            change_count: 0,
            callbacks: CallbackRegistry::new(),
            checker: ValidValueChecker::Unconfigured,
            tx_queue: None,
        }
    }

    /// Create an item with all `N` elements set to `initial`
    pub fn filled(name: &'a str, initial: T) -> Self {
        Self::new(name, &[initial; N])
    }

    #[must_use]
    pub fn with_checker(mut self, checker: ValidValueChecker<'a>) -> Self {
        self.checker = checker;
        self
    }

    /// Enqueue a change event on `queue` after every accepted write
    #[must_use]
    pub fn with_tx_queue(mut self, queue: &'a dyn EventQueue) -> Self {
        self.tx_queue = Some(queue);
        self
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> &[T] {
        &self.value
    }

    pub fn initial_value(&self) -> &[T] {
        &self.initial
    }

    pub fn count(&self) -> usize {
        self.value.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn checker(&self) -> &ValidValueChecker<'a> {
        &self.checker
    }

    pub fn register_callback(
        &mut self,
        callback: NamedCallback<'a, [T]>,
    ) -> Result<(), DataItemError> {
        self.callbacks.register(callback)
    }

    pub fn deregister_callback(&mut self, name: &str) -> bool {
        self.callbacks.deregister(name)
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Write `values` and report whether the stored value changed.
    ///
    /// Oversized input is a contract violation: it asserts in debug builds
    /// and is ignored in release builds. Values rejected by the validator
    /// leave the item untouched.
    pub fn set_value(&mut self, values: &[T]) -> bool {
        debug_assert!(values.len() <= N, "value exceeds item capacity");
        match self.try_set_value(values) {
            Ok(changed) => changed,
            Err(err) => {
                log_error!("\"{}\": set value failed: {}", self.name, err);
                false
            }
        }
    }

    /// Single element convenience for `set_value`
    pub fn set(&mut self, value: T) -> bool {
        self.set_value(&[value])
    }

    pub fn try_set_value(&mut self, values: &[T]) -> Result<bool, DataItemError> {
        if values.len() > N {
            return Err(DataItemError::TooManyValues {
                count: values.len(),
                capacity: N,
            });
        }
        let unchanged = values.len() == self.value.len()
            && values
                .iter()
                .zip(self.value.iter())
                .all(|(new, old)| new.same_bits(old));
        if unchanged {
            return Ok(false);
        }
        if !values.iter().all(|value| self.accepts(value)) {
            log_error!("\"{}\": value rejected", self.name);
            return Err(DataItemError::InvalidValue);
        }

        self.value.clear();
        // Length checked above
        let _ = self.value.extend_from_slice(values);
        self.change_count = self.change_count.wrapping_add(1);
        log_debug!("\"{}\": change {}", self.name, self.change_count);
        self.callbacks.call(self.name, &self.value);
        signal_change(self.tx_queue, self.name, self.change_count);
        Ok(true)
    }

    /// Parse a `|`-joined string and write the result
    pub fn try_set_value_from_str(&mut self, text: &str) -> Result<bool, DataItemError> {
        let mut parsed: Vec<T, N> = Vec::new();
        let mut count = 0;
        for part in text.split(ENCODE_DIVIDER) {
            count += 1;
            if !self.checker.is_valid_str(part) {
                return Err(DataItemError::InvalidValue);
            }
            let value = T::decode(part).ok_or(DataItemError::Decode)?;
            if parsed.push(value).is_err() {
                return Err(DataItemError::TooManyValues {
                    count: text.split(ENCODE_DIVIDER).count(),
                    capacity: N,
                });
            }
        }
        log_debug!("\"{}\": parsed {} values", self.name, count);
        self.try_set_value(&parsed)
    }

    fn accepts(&self, value: &T) -> bool {
        if !self.checker.is_configured() {
            return true;
        }
        let mut text: String<ELEMENT_TEXT_LENGTH> = String::new();
        value.encode(&mut text).is_ok() && self.checker.is_valid_str(&text)
    }
}

impl<T: DataValue, const N: usize> DynDataItem for DataItem<'_, T, N> {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn capacity(&self) -> usize {
        N
    }

    fn count(&self) -> usize {
        self.value.len()
    }

    fn change_count(&self) -> u32 {
        self.change_count
    }

    fn value_at(&self, index: usize) -> Option<Value> {
        self.value.get(index).map(|value| value.to_value())
    }

    fn apply_values(&mut self, values: &[Value]) -> Result<bool, DataItemError> {
        let mut typed: Vec<T, N> = Vec::new();
        for value in values {
            let element = T::from_value(value).ok_or(DataItemError::KindMismatch {
                expected: T::KIND,
                found: value.kind(),
            })?;
            typed.push(element).map_err(|_| DataItemError::TooManyValues {
                count: values.len(),
                capacity: N,
            })?;
        }
        self.try_set_value(&typed)
    }

    fn write_value_str(&self, out: &mut dyn Write) -> fmt::Result {
        write_joined(&self.value, out)
    }

    fn write_initial_value_str(&self, out: &mut dyn Write) -> fmt::Result {
        write_joined(&self.initial, out)
    }

    fn set_value_from_str(&mut self, text: &str) -> Result<bool, DataItemError> {
        self.try_set_value_from_str(text)
    }
}

impl<T: DataValue, const N: usize> SetupCallee for DataItem<'_, T, N> {
    fn name(&self) -> &str {
        self.name
    }

    /// Restore the initial value and announce it to every callback
    fn setup(&mut self) -> Result<(), SetupError> {
        self.value.clone_from(&self.initial);
        log_info!("\"{}\": initial value set", self.name);
        self.callbacks.call(self.name, &self.value);
        Ok(())
    }
}

/// String data item holding at most `N` bytes
pub struct StringDataItem<'a, const N: usize = DATAITEM_STRING_LENGTH> {
    name: &'a str,
    initial: String<N>,
    value: String<N>,
    change_count: u32,
    callbacks: CallbackRegistry<'a, str>,
    checker: ValidValueChecker<'a>,
    tx_queue: Option<&'a dyn EventQueue>,
}

impl<'a, const N: usize> StringDataItem<'a, N> {
    /// Create an item whose initial value is `initial`.
    ///
    /// Text longer than `N` bytes is a contract violation; release builds
    /// keep the longest prefix that fits on a char boundary.
    pub fn new(name: &'a str, initial: &str) -> Self {
        debug_assert!(initial.len() <= N, "initial value exceeds item capacity");
        let mut fitted: String<N> = String::new();
        for ch in initial.chars() {
            if fitted.push(ch).is_err() {
                break;
            }
        }
        Self {
            name,
            value: fitted.clone(),
            initial: fitted,
            change_count: 0,
            callbacks: CallbackRegistry::new(),
            checker: ValidValueChecker::Unconfigured,
            tx_queue: None,
        }
    }

    #[must_use]
    pub fn with_checker(mut self, checker: ValidValueChecker<'a>) -> Self {
        self.checker = checker;
        self
    }

    #[must_use]
    pub fn with_tx_queue(mut self, queue: &'a dyn EventQueue) -> Self {
        self.tx_queue = Some(queue);
        self
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn initial_value(&self) -> &str {
        &self.initial
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn register_callback(&mut self, callback: NamedCallback<'a, str>) -> Result<(), DataItemError> {
        self.callbacks.register(callback)
    }

    pub fn deregister_callback(&mut self, name: &str) -> bool {
        self.callbacks.deregister(name)
    }

    /// Write `value` and report whether the stored text changed.
    ///
    /// Same contract as [`DataItem::set_value`].
    pub fn set_value(&mut self, value: &str) -> bool {
        debug_assert!(value.len() <= N, "value exceeds item capacity");
        match self.try_set_value(value) {
            Ok(changed) => changed,
            Err(err) => {
                log_error!("\"{}\": set value failed: {}", self.name, err);
                false
            }
        }
    }

    pub fn try_set_value(&mut self, value: &str) -> Result<bool, DataItemError> {
        if value.len() > N {
            return Err(DataItemError::TooManyValues {
                count: value.len(),
                capacity: N,
            });
        }
        if self.value.as_str() == value {
            return Ok(false);
        }
        if !self.checker.is_valid_str(value) {
            log_error!("\"{}\": value \"{}\" rejected", self.name, value);
            return Err(DataItemError::InvalidValue);
        }

        self.value.clear();
        // Length checked above
        let _ = self.value.push_str(value);
        self.change_count = self.change_count.wrapping_add(1);
        log_debug!("\"{}\": set \"{}\"", self.name, self.value);
        self.callbacks.call(self.name, &self.value);
        signal_change(self.tx_queue, self.name, self.change_count);
        Ok(true)
    }
}

impl<const N: usize> DynDataItem for StringDataItem<'_, N> {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ValueKind {
        ValueKind::Text
    }

    fn capacity(&self) -> usize {
        1
    }

    fn count(&self) -> usize {
        1
    }

    fn change_count(&self) -> u32 {
        self.change_count
    }

    fn value_at(&self, index: usize) -> Option<Value> {
        if index != 0 {
            return None;
        }
        TextValue::try_from(self.value.as_str()).ok().map(Value::Text)
    }

    fn apply_values(&mut self, values: &[Value]) -> Result<bool, DataItemError> {
        match values {
            [Value::Text(text)] => self.try_set_value(text),
            [other] => Err(DataItemError::KindMismatch {
                expected: ValueKind::Text,
                found: other.kind(),
            }),
            _ => Err(DataItemError::TooManyValues {
                count: values.len(),
                capacity: 1,
            }),
        }
    }

    fn write_value_str(&self, out: &mut dyn Write) -> fmt::Result {
        out.write_str(&self.value)
    }

    fn write_initial_value_str(&self, out: &mut dyn Write) -> fmt::Result {
        out.write_str(&self.initial)
    }

    fn set_value_from_str(&mut self, text: &str) -> Result<bool, DataItemError> {
        self.try_set_value(text)
    }
}

impl<const N: usize> SetupCallee for StringDataItem<'_, N> {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        self.value.clone_from(&self.initial);
        log_info!("\"{}\": initial value \"{}\"", self.name, self.value);
        self.callbacks.call(self.name, &self.value);
        Ok(())
    }
}
