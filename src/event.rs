//! Context-keyed event notifications.
//!
//! Callees subscribe to a context string; the caller notifies every
//! subscriber of a context when that event happens.

use core::cell::RefCell;
use core::fmt;

use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRegistryFull;

impl fmt::Display for EventRegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event registry is full")
    }
}

pub trait EventCallee {
    fn event_notification(&mut self, context: &str);
}

pub type EventCalleeRef<'a> = &'a RefCell<dyn EventCallee + 'a>;

#[derive(Clone, Copy)]
struct Subscription<'a> {
    callee: EventCalleeRef<'a>,
    context: &'a str,
}

impl Subscription<'_> {
    fn matches(&self, callee: EventCalleeRef<'_>, context: &str) -> bool {
        self.context == context
            && core::ptr::addr_eq(core::ptr::from_ref(self.callee), core::ptr::from_ref(callee))
    }
}

/// Publisher side of the event system
pub struct EventCaller<'a, const MAX_SUBSCRIPTIONS: usize> {
    subscriptions: Vec<Subscription<'a>, MAX_SUBSCRIPTIONS>,
    contexts: Vec<&'a str, MAX_SUBSCRIPTIONS>,
}

impl<'a, const MAX_SUBSCRIPTIONS: usize> EventCaller<'a, MAX_SUBSCRIPTIONS> {
    pub const fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            contexts: Vec::new(),
        }
    }

    /// Subscribe `callee` to `context`.
    ///
    /// Returns `Ok(false)` if that exact pair is already subscribed.
    pub fn register_for_event_notification(
        &mut self,
        callee: EventCalleeRef<'a>,
        context: &'a str,
    ) -> Result<bool, EventRegistryFull> {
        if self
            .subscriptions
            .iter()
            .any(|subscription| subscription.matches(callee, context))
        {
            return Ok(false);
        }
        self.subscriptions
            .push(Subscription { callee, context })
            .map_err(|_| EventRegistryFull)?;
        log_debug!("registered for event \"{}\"", context);
        Ok(true)
    }

    pub fn deregister_for_event_notification(
        &mut self,
        callee: EventCalleeRef<'a>,
        context: &str,
    ) -> bool {
        match self
            .subscriptions
            .iter()
            .position(|subscription| subscription.matches(callee, context))
        {
            Some(index) => {
                self.subscriptions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Notify every subscriber of `context`, returning how many were reached
    pub fn send_notification_to_callees(&self, context: &str) -> usize {
        let mut notified = 0;
        for subscription in self.subscriptions.iter().filter(|s| s.context == context) {
            match subscription.callee.try_borrow_mut() {
                Ok(mut callee) => {
                    callee.event_notification(context);
                    notified += 1;
                }
                Err(_) => log_warn!("event \"{}\": callee busy", context),
            }
        }
        notified
    }

    /// Declare a context this caller publishes. Returns false if known.
    pub fn register_notification_context(&mut self, context: &'a str) -> Result<bool, EventRegistryFull> {
        if self.contexts.contains(&context) {
            return Ok(false);
        }
        self.contexts.push(context).map_err(|_| EventRegistryFull)?;
        Ok(true)
    }

    pub fn deregister_notification_context(&mut self, context: &str) -> bool {
        match self.contexts.iter().position(|known| *known == context) {
            Some(index) => {
                self.contexts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn notification_contexts(&self) -> &[&'a str] {
        &self.contexts
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl<const MAX_SUBSCRIPTIONS: usize> Default for EventCaller<'_, MAX_SUBSCRIPTIONS> {
    fn default() -> Self {
        Self::new()
    }
}
