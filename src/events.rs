//! Progress events
//!
//! Planners report progress to a caller-supplied bounded channel. Progress
//! never blocks the producer: when the channel is full the event is dropped,
//! and an event identical to the last one of its kind is not sent again.
//! Error events are the exception and wait for room in the channel.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use serde::Serialize;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    /// Completion fraction formatted as text, e.g. `0.25`
    Percent,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub text: String,
}

/// Producer side of the event channel.
#[derive(Debug)]
pub struct EventSink {
    tx: Option<SyncSender<Event>>,
    last: HashMap<EventKind, String>,
    dropped: usize,
}

impl EventSink {
    /// Sink plus the receiver the caller must drain.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx: Some(tx),
                last: HashMap::new(),
                dropped: 0,
            },
            rx,
        )
    }

    /// Sink without a consumer; events only go to the log.
    pub fn detached() -> Self {
        Self {
            tx: None,
            last: HashMap::new(),
            dropped: 0,
        }
    }

    /// Number of events lost to a full channel
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Emit a progress event without blocking.
    ///
    /// Returns true when the event was handed to the channel.
    pub fn emit(&mut self, kind: EventKind, text: impl Into<String>) -> bool {
        let text = text.into();
        if kind == EventKind::Error {
            return self.error(text);
        }

        let Some(tx) = &self.tx else {
            if kind != EventKind::Percent {
                log::debug!("{}:{}", kind, text);
            }
            return false;
        };

        if self.last.get(&kind) == Some(&text) {
            return false;
        }
        self.last.insert(kind, text.clone());

        match tx.try_send(Event { kind, text }) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                log::debug!("Event queue full, dropping {}:{}", event.kind, event.text);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn info(&mut self, text: impl Into<String>) -> bool {
        self.emit(EventKind::Info, text)
    }

    pub fn warning(&mut self, text: impl Into<String>) -> bool {
        self.emit(EventKind::Warning, text)
    }

    pub fn percent(&mut self, fraction: f64) -> bool {
        self.emit(EventKind::Percent, format!("{:.2}", fraction.clamp(0.0, 1.0)))
    }

    /// Deliver an error event, blocking until the consumer makes room.
    pub fn error(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        log::error!("{}", text);
        let Some(tx) = &self.tx else {
            return false;
        };
        self.last.insert(EventKind::Error, text.clone());
        tx.send(Event {
            kind: EventKind::Error,
            text,
        })
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_duplicate_events_are_suppressed() {
        let (mut sink, rx) = EventSink::bounded(8);
        assert!(sink.info("Creating partitions"));
        assert!(!sink.info("Creating partitions"));
        assert!(sink.info("Formatting"));
        assert!(sink.percent(0.5));

        let received: Vec<Event> = rx.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].text, "0.50");
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (mut sink, rx) = EventSink::bounded(1);
        assert!(sink.info("one"));
        assert!(!sink.info("two"));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_error_waits_for_consumer() {
        let (mut sink, rx) = EventSink::bounded(1);
        sink.info("filler");

        let consumer = thread::spawn(move || rx.iter().take(2).collect::<Vec<Event>>());
        assert!(sink.error("vgcreate failed"));

        let events = consumer.join().expect("consumer thread"); // test: thread does not panic
        assert_eq!(events[1].kind, EventKind::Error);
    }

    #[test]
    fn test_detached_sink_never_delivers() {
        let mut sink = EventSink::detached();
        assert!(!sink.info("nobody listens"));
        assert!(!sink.error("nobody listens"));
    }
}
