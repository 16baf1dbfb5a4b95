//! Session shadow state: variables and channel subscriptions that must be
//! replayed whenever a new physical link is established.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::transport::Notification;

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives notifications for one channel.
pub trait Listener {
    /// Handle one notification.
    fn notify(&mut self, notification: &Notification) -> Result<(), ListenerError>;
}

impl<F> Listener for F
where
    F: FnMut(&Notification) -> Result<(), ListenerError>,
{
    fn notify(&mut self, notification: &Notification) -> Result<(), ListenerError> {
        self(notification)
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(u64);

impl std::fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What removing a listener left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Removed {
    pub(crate) channel: String,
    pub(crate) last_on_channel: bool,
}

#[derive(Default)]
pub(crate) struct SessionState {
    vars: BTreeMap<String, String>,
    receivers: BTreeMap<String, Vec<(ReceiverId, Box<dyn Listener>)>>,
    next_id: u64,
}

impl SessionState {
    pub(crate) fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub(crate) fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub(crate) fn is_listening(&self, channel: &str) -> bool {
        self.receivers.contains_key(channel)
    }

    pub(crate) fn has_receivers(&self) -> bool {
        !self.receivers.is_empty()
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = &str> {
        self.receivers.keys().map(String::as_str)
    }

    pub(crate) fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn add_receiver(&mut self, channel: &str, listener: Box<dyn Listener>) -> ReceiverId {
        self.next_id += 1;
        let id = ReceiverId(self.next_id);
        self.receivers
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Take the listener out of the bookkeeping.
    pub(crate) fn remove_receiver(&mut self, id: ReceiverId) -> Option<Removed> {
        let (channel, listeners) = self
            .receivers
            .iter_mut()
            .find(|(_, listeners)| listeners.iter().any(|(r, _)| *r == id))?;
        listeners.retain(|(r, _)| *r != id);
        let removed = Removed {
            channel: channel.clone(),
            last_on_channel: listeners.is_empty(),
        };
        if removed.last_on_channel {
            self.receivers.remove(&removed.channel);
        }
        Some(removed)
    }

    pub(crate) fn clear_receivers(&mut self) {
        self.receivers.clear();
    }

    /// Invoke every listener on the notification's channel.
    ///
    /// Returns one message per listener that failed; delivery to the others
    /// is not interrupted.
    pub(crate) fn deliver(&mut self, notification: &Notification) -> Vec<String> {
        let mut failures = Vec::new();
        let Some(listeners) = self.receivers.get_mut(&notification.channel) else {
            return failures;
        };
        for (_, listener) in listeners.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.notify(notification)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "listener panicked".to_string(),
            };
            failures.push(format!(
                "Exception in notification receiver '{}': {}\n",
                notification.channel, reason
            ));
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn note(channel: &str) -> Notification {
        Notification {
            channel: channel.into(),
            payload: "p".into(),
            pid: 7,
        }
    }

    fn quiet() -> Box<dyn Listener> {
        Box::new(|_: &Notification| -> Result<(), ListenerError> { Ok(()) })
    }

    #[test]
    fn grouping_and_last_removal() {
        let mut state = SessionState::default();
        let a1 = state.add_receiver("a", quiet());
        let a2 = state.add_receiver("a", quiet());
        state.add_receiver("b", quiet());
        assert_eq!(state.channels().collect::<Vec<_>>(), vec!["a", "b"]);

        let first = state.remove_receiver(a1).unwrap();
        assert!(!first.last_on_channel);
        let second = state.remove_receiver(a2).unwrap();
        assert!(second.last_on_channel);
        assert!(!state.is_listening("a"));
        assert_eq!(state.remove_receiver(a2), None);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let hits = Rc::new(RefCell::new(0));
        let mut state = SessionState::default();
        state.add_receiver(
            "a",
            Box::new(|_: &Notification| -> Result<(), ListenerError> { Err("nope".into()) }),
        );
        let counter = Rc::clone(&hits);
        state.add_receiver(
            "a",
            Box::new(move |_: &Notification| -> Result<(), ListenerError> {
                *counter.borrow_mut() += 1;
                Ok(())
            }),
        );

        let failures = state.deliver(&note("a"));
        assert_eq!(failures, vec!["Exception in notification receiver 'a': nope\n".to_string()]);
        assert_eq!(*hits.borrow(), 1);
        assert!(state.deliver(&note("other")).is_empty());
    }
}
