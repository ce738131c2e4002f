// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::{Arc, Mutex, PoisonError};

use codec::v3::PublishPacket;
use codec::Topic;

use crate::error::{Error, ErrorKind};

/// Callback invoked for every inbound publish matching a subscribed filter.
pub type MessageHandler = Arc<dyn Fn(&PublishPacket) + Send + Sync>;

/// Dispatches inbound publish packets to subscription handlers.
///
/// The client uses [`WildcardRouter`] unless the consumer supplies another
/// implementation at construction.
pub trait TopicRouter: Send + Sync {
    /// Register `handler` for `filter`. Registering a filter twice replaces
    /// the previous handler.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    fn handle(&self, filter: &str, handler: MessageHandler) -> Result<(), Error>;

    /// Drop the registration of `filter`, if any.
    fn remove(&self, filter: &str);

    /// Deliver `packet` to every handler whose filter matches its topic.
    fn dispatch(&self, packet: &PublishPacket);
}

/// Default router matching topic filters with `+` and `#` wildcard support
/// per MQTT chapter-4.7.
#[derive(Default)]
pub struct WildcardRouter {
    routes: Mutex<Vec<(Topic, MessageHandler)>>,
}

impl WildcardRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopicRouter for WildcardRouter {
    fn handle(&self, filter: &str, handler: MessageHandler) -> Result<(), Error> {
        let topic = Topic::parse(filter).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid topic filter `{filter}`: {err:?}"),
            )
        })?;
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(route) = routes.iter_mut().find(|(t, _)| t.topic() == filter) {
            route.1 = handler;
        } else {
            routes.push((topic, handler));
        }
        Ok(())
    }

    fn remove(&self, filter: &str) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.retain(|(topic, _)| topic.topic() != filter);
    }

    fn dispatch(&self, packet: &PublishPacket) {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        for (topic, handler) in routes.iter() {
            if topic.is_match(packet.topic()) {
                handler(packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (MessageHandler, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_handler = counter.clone();
        let handler: MessageHandler = Arc::new(move |_packet| {
            counter_in_handler.fetch_add(1, Ordering::SeqCst);
        });
        (handler, counter)
    }

    fn publish(topic: &str) -> PublishPacket {
        PublishPacket::new(topic, QoS::AtMostOnce, b"payload").unwrap()
    }

    #[test]
    fn test_literal_dispatch() {
        let router = WildcardRouter::new();
        let (handler, counter) = counting_handler();
        router.handle("sport/tennis", handler).unwrap();

        router.dispatch(&publish("sport/tennis"));
        router.dispatch(&publish("sport/golf"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_dispatch() {
        let router = WildcardRouter::new();
        let (handler, counter) = counting_handler();
        router.handle("sensors/+/temperature", handler).unwrap();

        router.dispatch(&publish("sensors/kitchen/temperature"));
        router.dispatch(&publish("sensors/attic/temperature"));
        router.dispatch(&publish("sensors/attic/humidity"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let (handler, counter) = counting_handler();
        router.handle("sensors/#", handler).unwrap();
        router.dispatch(&publish("sensors/kitchen/temperature"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_and_remove() {
        let router = WildcardRouter::new();
        let (first_handler, first_counter) = counting_handler();
        let (second_handler, second_counter) = counting_handler();

        router.handle("a/b", first_handler).unwrap();
        router.handle("a/b", second_handler).unwrap();
        router.dispatch(&publish("a/b"));
        assert_eq!(first_counter.load(Ordering::SeqCst), 0);
        assert_eq!(second_counter.load(Ordering::SeqCst), 1);

        router.remove("a/b");
        router.dispatch(&publish("a/b"));
        assert_eq!(second_counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let router = WildcardRouter::new();
        let (handler, _counter) = counting_handler();
        let err = router.handle("bad/+filter", handler).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
