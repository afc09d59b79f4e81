#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use light_tower_link::{
    ByteTransport, EventCallee, PreferenceError, PreferenceStore, PreferenceText, SetupCallee,
    SetupError, Task,
};

/// Ordered record of calls shared between fakes and the test body
pub type Journal = Rc<RefCell<Vec<String>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.borrow().clone()
}

/// In-memory serial port
#[derive(Default)]
pub struct MemoryTransport {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    /// Accept at most this many bytes per write
    pub write_limit: Option<usize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn feed_str(&mut self, text: &str) {
        self.feed(text.as_bytes());
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.tx).into_owned()
    }

    pub fn take_written(&mut self) -> String {
        let text = self.written();
        self.tx.clear();
        text
    }
}

impl ByteTransport for MemoryTransport {
    fn available(&self) -> usize {
        self.rx.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let accepted = self.write_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        self.tx.extend_from_slice(&bytes[..accepted]);
        accepted
    }
}

/// In-memory preference backend
#[derive(Default)]
pub struct MemoryStore {
    pub values: HashMap<String, String>,
    pub writes: usize,
    pub fail_writes: bool,
    /// Store something other than what was written
    pub corrupt_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.values.insert(key.to_string(), value.to_string());
        store
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl PreferenceStore for MemoryStore {
    fn is_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn get_str(&self, key: &str) -> Option<PreferenceText> {
        self.values
            .get(key)
            .and_then(|value| PreferenceText::try_from(value.as_str()).ok())
    }

    fn put_str(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        if self.fail_writes {
            return Err(PreferenceError::Store);
        }
        self.writes += 1;
        let stored = if self.corrupt_writes {
            format!("{}?", value)
        } else {
            value.to_string()
        };
        self.values.insert(key.to_string(), stored);
        Ok(())
    }
}

/// Setup callee that records each setup call
pub struct RecordingCallee {
    pub name: &'static str,
    pub journal: Journal,
    pub setup_count: usize,
    pub fail: bool,
}

impl RecordingCallee {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
            setup_count: 0,
            fail: false,
        }
    }

    pub fn failing(name: &'static str, journal: &Journal) -> Self {
        Self {
            fail: true,
            ..Self::new(name, journal)
        }
    }
}

impl SetupCallee for RecordingCallee {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        self.setup_count += 1;
        self.journal.borrow_mut().push(format!("setup {}", self.name));
        if self.fail {
            return Err(SetupError::Failed("refused"));
        }
        Ok(())
    }
}

/// Event callee that records each notification
pub struct RecordingListener {
    pub name: &'static str,
    pub journal: Journal,
}

impl RecordingListener {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
        }
    }
}

impl EventCallee for RecordingListener {
    fn event_notification(&mut self, context: &str) {
        self.journal
            .borrow_mut()
            .push(format!("{} <- {}", self.name, context));
    }
}

/// Task that records setup and runs, and is ready while `ready` is set
pub struct RecordingTask {
    pub name: &'static str,
    pub journal: Journal,
    pub ready: bool,
    pub fail_setup: bool,
}

impl RecordingTask {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
            ready: true,
            fail_setup: false,
        }
    }

    pub fn idle(name: &'static str, journal: &Journal) -> Self {
        Self {
            ready: false,
            ..Self::new(name, journal)
        }
    }

    pub fn failing(name: &'static str, journal: &Journal) -> Self {
        Self {
            fail_setup: true,
            ..Self::new(name, journal)
        }
    }
}

impl SetupCallee for RecordingTask {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        self.journal.borrow_mut().push(format!("setup {}", self.name));
        if self.fail_setup {
            return Err(SetupError::Failed("refused"));
        }
        Ok(())
    }
}

impl Task for RecordingTask {
    fn can_run(&self) -> bool {
        self.ready
    }

    fn run_once(&mut self) {
        self.journal.borrow_mut().push(format!("run {}", self.name));
    }
}
