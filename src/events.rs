//! Named-channel publish/subscribe.
//!
//! The [`EventHub`] is a synchronous, in-process fan-out: [`publish`]
//! invokes every callback registered on a channel, in registration order,
//! on the publishing thread, before returning.
//!
//! # Fault isolation
//!
//! One failing subscriber never affects the others. A callback returning
//! `Err` or panicking is logged and skipped; publishing continues with the
//! next callback and `publish` itself always returns normally.
//!
//! # Re-entrancy
//!
//! `publish` iterates over a snapshot of the channel's callbacks taken
//! before the first invocation, and holds no lock while callbacks run.
//! Callbacks may therefore subscribe, unsubscribe or publish (to any
//! channel, including their own) without deadlocking.
//!
//! # Identity
//!
//! Callbacks are compared by `Arc` pointer identity. Subscribing the same
//! callback twice registers it twice (and it is invoked twice);
//! [`unsubscribe`] removes every registration of that callback.
//!
//! [`publish`]: EventHub::publish
//! [`unsubscribe`]: EventHub::unsubscribe

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// A subscriber callback.
///
/// Returning `Err` is treated as a subscriber failure: it is logged and
/// does not stop delivery to later subscribers.
pub type EventCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as an [`EventCallback`].
///
/// Keep the returned `Arc` if you intend to unsubscribe later; identity is
/// by pointer, so a second `callback(...)` of the same closure is a
/// different subscriber.
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Channel name -> ordered subscriber list.
#[derive(Default)]
pub struct EventHub {
    channels: Mutex<HashMap<String, Vec<EventCallback>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock().expect("EventHub mutex poisoned");
        f.debug_struct("EventHub")
            .field("channel_count", &channels.len())
            .field(
                "total_callbacks",
                &channels.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to `channel`'s subscriber list.
    ///
    /// No uniqueness check: registering the same callback twice yields two
    /// invocations per publish.
    pub fn subscribe(&self, channel: &str, callback: EventCallback) {
        let mut channels = self.channels.lock().expect("EventHub mutex poisoned");
        channels.entry(channel.to_string()).or_default().push(callback);
        log::trace!("Subscribed to '{channel}'");
    }

    /// Remove every registration of `callback` from `channel`.
    ///
    /// No-op if the channel or the callback is absent.
    pub fn unsubscribe(&self, channel: &str, callback: &EventCallback) {
        let mut channels = self.channels.lock().expect("EventHub mutex poisoned");
        let Some(callbacks) = channels.get_mut(channel) else {
            return;
        };
        callbacks.retain(|existing| !Arc::ptr_eq(existing, callback));
        if callbacks.is_empty() {
            channels.remove(channel);
        }
    }

    /// Invoke every callback currently registered on `channel`.
    ///
    /// Returns the number of callbacks that completed without error.
    /// Publishing to a channel with no subscribers is a no-op returning 0.
    pub fn publish(&self, channel: &str, payload: &Value) -> usize {
        // Snapshot under the lock, invoke with the lock released.
        let snapshot: Vec<EventCallback> = {
            let channels = self.channels.lock().expect("EventHub mutex poisoned");
            match channels.get(channel) {
                Some(callbacks) => callbacks.clone(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for callback in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(Ok(())) => invoked += 1,
                Ok(Err(e)) => log::warn!("Event callback for '{channel}' failed: {e:#}"),
                Err(panic) => log::warn!(
                    "Event callback for '{channel}' panicked: {}",
                    panic_message(panic.as_ref())
                ),
            }
        }
        invoked
    }

    /// Check if any callbacks are registered for `channel`.
    #[must_use]
    pub fn has_subscribers(&self, channel: &str) -> bool {
        let channels = self.channels.lock().expect("EventHub mutex poisoned");
        channels.get(channel).is_some_and(|v| !v.is_empty())
    }

    /// Number of registrations on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().expect("EventHub mutex poisoned");
        channels.get(channel).map_or(0, Vec::len)
    }

    /// Total registrations across all channels.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        let channels = self.channels.lock().expect("EventHub mutex poisoned");
        channels.values().map(Vec::len).sum()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> EventCallback {
        let log = Arc::clone(log);
        let name = name.to_string();
        callback(move |_| {
            log.lock().unwrap().push(name.clone());
            Ok(())
        })
    }

    #[test]
    fn test_new_hub_is_empty() {
        let hub = EventHub::new();
        assert_eq!(hub.callback_count(), 0);
        assert!(!hub.has_subscribers("x"));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = EventHub::new();
        assert_eq!(hub.publish("nobody", &json!({"a": 1})), 0);
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe("x", recorder(&log, "A"));
        hub.subscribe("x", recorder(&log, "B"));
        hub.subscribe("y", recorder(&log, "C"));

        assert_eq!(hub.publish("x", &Value::Null), 2);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe("x", callback(|_| anyhow::bail!("intentional error")));
        hub.subscribe("x", recorder(&log, "B"));

        assert_eq!(hub.publish("x", &Value::Null), 1);
        assert_eq!(*log.lock().unwrap(), vec!["B"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe("x", callback(|_| panic!("intentional panic")));
        hub.subscribe("x", recorder(&log, "B"));

        assert_eq!(hub.publish("x", &Value::Null), 1);
        assert_eq!(*log.lock().unwrap(), vec!["B"]);
    }

    #[test]
    fn test_payload_is_delivered() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        hub.subscribe(
            "ready",
            callback(move |payload| {
                *seen_clone.lock().unwrap() = Some(payload.clone());
                Ok(())
            }),
        );

        hub.publish("ready", &json!({"address": "0xabc", "network": "main"}));
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(json!({"address": "0xabc", "network": "main"}))
        );
    }

    #[test]
    fn test_duplicate_subscription_invokes_twice() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&log, "A");
        hub.subscribe("x", Arc::clone(&cb));
        hub.subscribe("x", Arc::clone(&cb));

        assert_eq!(hub.publish("x", &Value::Null), 2);
        assert_eq!(log.lock().unwrap().len(), 2);

        // Unsubscribe removes every registration of that callback
        hub.unsubscribe("x", &cb);
        assert_eq!(hub.subscriber_count("x"), 0);
        assert_eq!(hub.publish("x", &Value::Null), 0);
    }

    #[test]
    fn test_unsubscribe_only_matching_identity() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "A");
        let b = recorder(&log, "B");
        hub.subscribe("x", Arc::clone(&a));
        hub.subscribe("x", Arc::clone(&b));

        hub.unsubscribe("x", &a);
        hub.publish("x", &Value::Null);
        assert_eq!(*log.lock().unwrap(), vec!["B"]);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let hub = EventHub::new();
        let cb = callback(|_| Ok(()));
        hub.unsubscribe("missing", &cb);
        hub.subscribe("x", callback(|_| Ok(())));
        hub.unsubscribe("x", &cb);
        assert_eq!(hub.subscriber_count("x"), 1);
    }

    #[test]
    fn test_unsubscribe_during_publish() {
        let hub = Arc::new(EventHub::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        // A removes B mid-publish; B still sees this publish (snapshot),
        // but not the next one.
        let b = recorder(&log, "B");
        let hub_for_a = Arc::clone(&hub);
        let b_for_a = Arc::clone(&b);
        let log_for_a = Arc::clone(&log);
        hub.subscribe(
            "x",
            callback(move |_| {
                log_for_a.lock().unwrap().push("A".to_string());
                hub_for_a.unsubscribe("x", &b_for_a);
                Ok(())
            }),
        );
        hub.subscribe("x", Arc::clone(&b));

        assert_eq!(hub.publish("x", &Value::Null), 2);
        assert_eq!(hub.publish("x", &Value::Null), 1);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "A"]);
    }

    #[test]
    fn test_reentrant_publish() {
        let hub = Arc::new(EventHub::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let hub_inner = Arc::clone(&hub);
        let log_outer = Arc::clone(&log);
        hub.subscribe(
            "outer",
            callback(move |_| {
                log_outer.lock().unwrap().push("outer".to_string());
                hub_inner.publish("inner", &Value::Null);
                Ok(())
            }),
        );
        hub.subscribe("inner", recorder(&log, "inner"));

        assert_eq!(hub.publish("outer", &Value::Null), 1);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_subscribe_during_publish_takes_effect_next_time() {
        let hub = Arc::new(EventHub::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let hub_inner = Arc::clone(&hub);
        let late = recorder(&log, "late");
        hub.subscribe(
            "x",
            callback(move |_| {
                hub_inner.subscribe("x", Arc::clone(&late));
                Ok(())
            }),
        );

        assert_eq!(hub.publish("x", &Value::Null), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(hub.subscriber_count("x"), 2);
    }
}
