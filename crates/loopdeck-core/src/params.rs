//! Parameter change fan-out
//!
//! Host parameter changes arrive on the control thread keyed by name; the
//! hub forwards each value to every subscriber registered for that name.
//! Subscribers typically write a shared atomic or push an engine command.

use std::collections::HashMap;
use std::sync::Mutex;

type Callback = Box<dyn Fn(f32) + Send>;

#[derive(Default)]
pub struct ParameterHub {
    subscribers: Mutex<HashMap<String, Vec<Callback>>>,
}

impl ParameterHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a parameter name. Multiple subscribers per
    /// name are supported; all of them fire on every change.
    pub fn subscribe(&self, name: impl Into<String>, callback: impl Fn(f32) + Send + 'static) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.entry(name.into()).or_default().push(Box::new(callback));
        }
    }

    /// Deliver a value to every subscriber of `name`.
    pub fn notify(&self, name: &str, value: f32) {
        if let Ok(subscribers) = self.subscribers.lock() {
            if let Some(callbacks) = subscribers.get(name) {
                for callback in callbacks {
                    callback(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_all_subscribers_receive_value() {
        let hub = ParameterHub::new();
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let count = count.clone();
            hub.subscribe("track0_volume", move |v| {
                assert_eq!(v, 0.75);
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        hub.notify("track0_volume", 0.75);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unrelated_parameter_does_not_fire() {
        let hub = ParameterHub::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        hub.subscribe("master_pan", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hub.notify("master_volume", 1.0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
