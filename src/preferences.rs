//! Persisted item values.
//!
//! A [`PreferenceManager`] keeps one item in a key/string store: on startup it
//! loads the stored value or seeds the store with the initial value, and on
//! every later change it saves at most once per timeout, deferring the rest
//! to a delayed flush. [`PreferenceTask`] runs a set of managers from the
//! task scheduler.

use core::fmt;

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::data_item::{DataItemRef, DynDataItem};
use crate::setup::{SetupCallee, SetupError};
use crate::task::Task;

/// Minimum spacing between two saves of the same key
pub const PREFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest stored string
pub const MAX_PREFERENCE_LENGTH: usize = 256;

pub type PreferenceText = String<MAX_PREFERENCE_LENGTH>;

/// Key/string persistence backend
pub trait PreferenceStore {
    fn is_key(&self, key: &str) -> bool;

    fn get_str(&self, key: &str) -> Option<PreferenceText>;

    fn put_str(&mut self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceError {
    /// The backend failed to write
    Store,
    ValueTooLong,
    /// Reading back a saved key returned something else
    Mismatch,
    ItemBusy,
    TooManyItems,
}

impl fmt::Display for PreferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => f.write_str("preference store failed"),
            Self::ValueTooLong => write!(f, "value longer than {} bytes", MAX_PREFERENCE_LENGTH),
            Self::Mismatch => f.write_str("saved value reads back differently"),
            Self::ItemBusy => f.write_str("item is busy"),
            Self::TooManyItems => f.write_str("no room for another preference"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored value was applied
    Loaded,
    /// The stored value was unusable, the initial value was applied
    Restored,
    /// The key was missing and now holds the initial value
    Initialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Saved too recently, the flush happens in a later `tick`
    Deferred,
}

/// Keeps one item in sync with one preference key
#[derive(Debug, Clone, Copy)]
pub struct PreferenceManager<'a> {
    key: &'a str,
    timeout: Duration,
    last_save: Option<Instant>,
    pending: bool,
}

impl<'a> PreferenceManager<'a> {
    pub const fn new(key: &'a str) -> Self {
        Self {
            key,
            timeout: PREFERENCE_TIMEOUT,
            last_save: None,
            pending: false,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn key(&self) -> &'a str {
        self.key
    }

    /// Whether a deferred save is waiting for its flush
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Whether a deferred save should be flushed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.pending && !self.within_timeout(now)
    }

    /// Apply the stored value to `item`, or seed the store with the initial one
    pub fn initialize_and_load(
        &mut self,
        now: Instant,
        store: &mut dyn PreferenceStore,
        item: &mut dyn DynDataItem,
    ) -> Result<LoadOutcome, PreferenceError> {
        if store.is_key(self.key) {
            if let Some(stored) = store.get_str(self.key) {
                match item.set_value_from_str(&stored) {
                    Ok(_) => {
                        log_info!("\"{}\": loaded \"{}\"", self.key, stored.as_str());
                        return Ok(LoadOutcome::Loaded);
                    }
                    Err(err) => log_warn!("\"{}\": stored value rejected: {}", self.key, err),
                }
            }

            let mut initial = PreferenceText::new();
            item.write_initial_value_str(&mut initial)
                .map_err(|_| PreferenceError::ValueTooLong)?;
            if let Err(err) = item.set_value_from_str(&initial) {
                log_error!("\"{}\": initial value rejected: {}", self.key, err);
            }
            self.save(now, store, item)?;
            return Ok(LoadOutcome::Restored);
        }

        log_info!("\"{}\": initializing preference", self.key);
        let mut initial = PreferenceText::new();
        item.write_initial_value_str(&mut initial)
            .map_err(|_| PreferenceError::ValueTooLong)?;
        self.write(now, store, &initial)?;
        Ok(LoadOutcome::Initialized)
    }

    /// Save `item` now, or defer if the last save is too recent
    pub fn value_changed(
        &mut self,
        now: Instant,
        store: &mut dyn PreferenceStore,
        item: &dyn DynDataItem,
    ) -> Result<SaveOutcome, PreferenceError> {
        if self.within_timeout(now) {
            log_debug!("\"{}\": save deferred", self.key);
            self.pending = true;
            return Ok(SaveOutcome::Deferred);
        }
        self.save(now, store, item)?;
        Ok(SaveOutcome::Saved)
    }

    /// Flush a deferred save once the timeout has elapsed.
    /// Returns whether a save happened.
    pub fn tick(
        &mut self,
        now: Instant,
        store: &mut dyn PreferenceStore,
        item: &dyn DynDataItem,
    ) -> Result<bool, PreferenceError> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.save(now, store, item)?;
        Ok(true)
    }

    fn save(
        &mut self,
        now: Instant,
        store: &mut dyn PreferenceStore,
        item: &dyn DynDataItem,
    ) -> Result<(), PreferenceError> {
        let mut text = PreferenceText::new();
        item.write_value_str(&mut text)
            .map_err(|_| PreferenceError::ValueTooLong)?;
        self.write(now, store, &text)
    }

    fn write(
        &mut self,
        now: Instant,
        store: &mut dyn PreferenceStore,
        text: &str,
    ) -> Result<(), PreferenceError> {
        store.put_str(self.key, text)?;
        self.last_save = Some(now);
        self.pending = false;

        if store.get_str(self.key).as_deref() != Some(text) {
            log_error!("\"{}\": saved \"{}\" does not read back", self.key, text);
            return Err(PreferenceError::Mismatch);
        }
        log_debug!("\"{}\": saved \"{}\"", self.key, text);
        Ok(())
    }

    fn within_timeout(&self, now: Instant) -> bool {
        self.last_save.is_some_and(|last| {
            now.as_millis().saturating_sub(last.as_millis()) < self.timeout.as_millis()
        })
    }
}

struct PreferenceBinding<'a> {
    manager: PreferenceManager<'a>,
    item: DataItemRef<'a>,
    seen_change_count: u32,
}

/// Keeps a set of items persisted in one store
pub struct PreferenceTask<'a, S: PreferenceStore, const MAX_ITEMS: usize> {
    name: &'a str,
    store: S,
    bindings: Vec<PreferenceBinding<'a>, MAX_ITEMS>,
}

impl<'a, S: PreferenceStore, const MAX_ITEMS: usize> PreferenceTask<'a, S, MAX_ITEMS> {
    pub const fn new(name: &'a str, store: S) -> Self {
        Self {
            name,
            store,
            bindings: Vec::new(),
        }
    }

    pub fn bind(&mut self, manager: PreferenceManager<'a>, item: DataItemRef<'a>) -> Result<(), PreferenceError> {
        let seen_change_count = item
            .try_borrow()
            .map_err(|_| PreferenceError::ItemBusy)?
            .change_count();
        self.bindings
            .push(PreferenceBinding {
                manager,
                item,
                seen_change_count,
            })
            .map_err(|_| PreferenceError::TooManyItems)
    }

    /// Load or initialize every bound item
    pub fn load_all(&mut self, now: Instant) -> Result<(), PreferenceError> {
        for binding in &mut self.bindings {
            let mut item = binding
                .item
                .try_borrow_mut()
                .map_err(|_| PreferenceError::ItemBusy)?;
            binding
                .manager
                .initialize_and_load(now, &mut self.store, &mut *item)?;
            binding.seen_change_count = item.change_count();
        }
        Ok(())
    }

    /// Save changed items and flush due deferred saves.
    /// Returns the number of saves performed.
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut saved = 0;
        for binding in &mut self.bindings {
            let Ok(item) = binding.item.try_borrow() else {
                continue;
            };
            let change_count = item.change_count();
            let result = if change_count == binding.seen_change_count {
                binding.manager.tick(now, &mut self.store, &*item)
            } else {
                binding.seen_change_count = change_count;
                binding
                    .manager
                    .value_changed(now, &mut self.store, &*item)
                    .map(|outcome| outcome == SaveOutcome::Saved)
            };
            match result {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => log_error!("{}: \"{}\": {}", self.name, binding.manager.key(), err),
            }
        }
        saved
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn has_work(&self, now: Instant) -> bool {
        self.bindings.iter().any(|binding| {
            binding.manager.is_due(now)
                || binding
                    .item
                    .try_borrow()
                    .is_ok_and(|item| item.change_count() != binding.seen_change_count)
        })
    }
}

impl<S: PreferenceStore, const MAX_ITEMS: usize> SetupCallee for PreferenceTask<'_, S, MAX_ITEMS> {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        self.load_all(Instant::now()).map_err(|err| {
            log_error!("{}: loading preferences failed: {}", self.name, err);
            SetupError::Failed("preference load failed")
        })
    }
}

impl<S: PreferenceStore, const MAX_ITEMS: usize> Task for PreferenceTask<'_, S, MAX_ITEMS> {
    fn can_run(&self) -> bool {
        self.has_work(Instant::now())
    }

    fn run_once(&mut self) {
        self.poll(Instant::now());
    }
}
