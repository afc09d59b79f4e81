//! One-shot setup registry.
//!
//! Objects that need deferred initialization register with a
//! [`SetupCaller`]; the owner runs every registered setup in one call once
//! the system is wired together.

use core::cell::RefCell;
use core::fmt;

use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// The callee could not initialize itself
    Failed(&'static str),
    /// No room left in the registry
    RegistryFull,
    /// The callee is borrowed elsewhere
    Busy,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "setup failed: {}", reason),
            Self::RegistryFull => f.write_str("setup registry is full"),
            Self::Busy => f.write_str("setup callee is busy"),
        }
    }
}

/// Something that needs a one-time setup call
pub trait SetupCallee {
    fn name(&self) -> &str;

    fn setup(&mut self) -> Result<(), SetupError>;
}

/// Shared handle to a registered callee
pub type SetupCalleeRef<'a> = &'a RefCell<dyn SetupCallee + 'a>;

fn same_callee(a: SetupCalleeRef<'_>, b: SetupCalleeRef<'_>) -> bool {
    core::ptr::addr_eq(core::ptr::from_ref(a), core::ptr::from_ref(b))
}

/// Registry of setup callees, called back in registration order
pub struct SetupCaller<'a, const MAX_CALLEES: usize> {
    callees: Vec<SetupCalleeRef<'a>, MAX_CALLEES>,
}

impl<'a, const MAX_CALLEES: usize> SetupCaller<'a, MAX_CALLEES> {
    pub const fn new() -> Self {
        Self {
            callees: Vec::new(),
        }
    }

    /// Register `callee`. Registering the same callee twice is a no-op.
    pub fn register_for_setup_call(&mut self, callee: SetupCalleeRef<'a>) -> Result<(), SetupError> {
        if self.is_registered(callee) {
            log_warn!("setup callee already registered");
            return Ok(());
        }
        self.callees.push(callee).map_err(|_| SetupError::RegistryFull)?;
        log_debug!("setup callee registered");
        Ok(())
    }

    /// Remove `callee`, returning whether it was registered
    pub fn deregister_for_setup_call(&mut self, callee: SetupCalleeRef<'a>) -> bool {
        match self.callees.iter().position(|known| same_callee(*known, callee)) {
            Some(index) => {
                self.callees.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, callee: SetupCalleeRef<'a>) -> bool {
        self.callees.iter().any(|known| same_callee(*known, callee))
    }

    pub fn callee_count(&self) -> usize {
        self.callees.len()
    }

    /// Call `setup` once on every registered callee, in registration order.
    ///
    /// Stops at the first failure and returns it. Returns the number of
    /// callees set up otherwise.
    pub fn setup_all_setup_callees(&self) -> Result<usize, SetupError> {
        for callee in &self.callees {
            let mut callee = callee.try_borrow_mut().map_err(|_| SetupError::Busy)?;
            log_debug!("setting up \"{}\"", callee.name());
            callee.setup()?;
        }
        Ok(self.callees.len())
    }
}

impl<const MAX_CALLEES: usize> Default for SetupCaller<'_, MAX_CALLEES> {
    fn default() -> Self {
        Self::new()
    }
}
