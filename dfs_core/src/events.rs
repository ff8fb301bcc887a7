use crate::error::{DfsError, DfsResult};
use crate::id::SpaceId;
use crate::node::{Reference, Timestamp};
use std::fmt::Debug;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    FileUploaded {
        owner: String,
        executant: String,
        reference: Reference,
        timestamp: Timestamp,
    },
    ContainerCreated {
        executant: String,
        reference: Reference,
        timestamp: Timestamp,
    },
    ItemMoved {
        executant: String,
        old_reference: Reference,
        reference: Reference,
        timestamp: Timestamp,
    },
    ItemTrashed {
        executant: String,
        key: String,
        reference: Reference,
        timestamp: Timestamp,
    },
    ItemRestored {
        executant: String,
        key: String,
        reference: Reference,
        timestamp: Timestamp,
    },
    ItemPurged {
        executant: String,
        key: String,
        space_id: SpaceId,
        timestamp: Timestamp,
    },
}

/// Destination of engine events. Failures never fail the operation that
/// emitted the event; the engine logs them.
pub trait EventSink: Send + Sync + Debug {
    fn publish(&self, event: Event) -> DfsResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: Event) -> DfsResult<()> {
        Ok(())
    }
}

/// Forwards events to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: Event) -> DfsResult<()> {
        self.tx
            .send(event)
            .map_err(|_| DfsError::Backend("event receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_and_reports_closed_receiver() {
        let (sink, mut rx) = ChannelSink::new();
        let space = SpaceId::new("s1").unwrap();
        let event = Event::ContainerCreated {
            executant: "alice".into(),
            reference: Reference::path(space, "/docs"),
            timestamp: Timestamp::from_nanos(1),
        };
        sink.publish(event.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(event.clone()));

        drop(rx);
        assert!(sink.publish(event).is_err());
    }
}
