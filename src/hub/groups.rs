//! Group-based fan-out, independent of the concrete transport
//!
//! The hub talks to connections only through [`GroupTransport`]: attach a
//! connection's outbound sink, subscribe it to named groups, publish frames.
//! [`InMemoryGroups`] is the in-process implementation used by the WebSocket
//! endpoint; every send goes through the connection's own queue so one stale
//! or slow connection never holds up its siblings.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{ConnectionId, GroupLabel};

/// A serialized frame, shared between every recipient of one fan-out
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("connection send queue is full")]
    QueueFull,
    #[error("connection is not attached")]
    UnknownConnection,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn merge(self, other: DeliveryReport) -> DeliveryReport {
        DeliveryReport {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
        }
    }

    fn record(&mut self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Outbound half of one physical connection
pub trait ConnectionSink: Send + Sync {
    /// Queue a frame without waiting on the connection's I/O
    fn send(&self, frame: Frame) -> Result<(), DeliveryError>;
}

/// Sink backed by the bounded channel drained by a connection's writer task
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames dropped because the queue was full or closed
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ConnectionSink for ChannelSink {
    fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(DeliveryError::QueueFull),
                    mpsc::error::TrySendError::Closed(_) => Err(DeliveryError::Closed),
                }
            }
        }
    }
}

/// Transport-native grouping primitive, as seen by the hub
pub trait GroupTransport: Send + Sync {
    /// Make a connection addressable
    fn attach(&self, connection: ConnectionId, sink: Arc<dyn ConnectionSink>);

    /// Forget a connection and every group subscription it held
    fn detach(&self, connection: &ConnectionId);

    /// Subscribe an attached connection to `group`. Returns false for unknown connections.
    fn subscribe(&self, connection: &ConnectionId, group: &GroupLabel) -> bool;

    fn unsubscribe(&self, connection: &ConnectionId, group: &GroupLabel);

    /// Send to every subscriber of `group`, optionally skipping one connection
    fn publish_to_group(
        &self,
        group: &GroupLabel,
        frame: &Frame,
        except: Option<&ConnectionId>,
    ) -> DeliveryReport;

    fn send_to(&self, connection: &ConnectionId, frame: &Frame) -> Result<(), DeliveryError>;

    /// Send to every attached connection
    fn publish_all(&self, frame: &Frame) -> DeliveryReport;

    fn connection_count(&self) -> usize;
}

/// In-process [`GroupTransport`]
#[derive(Default)]
pub struct InMemoryGroups {
    sinks: RwLock<HashMap<ConnectionId, Arc<dyn ConnectionSink>>>,
    groups: RwLock<HashMap<GroupLabel, BTreeSet<ConnectionId>>>,
    subscriptions: RwLock<HashMap<ConnectionId, HashSet<GroupLabel>>>,
}

impl InMemoryGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn deliver(
        &self,
        targets: Vec<(ConnectionId, Arc<dyn ConnectionSink>)>,
        frame: &Frame,
        scope: &str,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (connection, sink) in targets {
            let result = sink.send(Arc::clone(frame));
            if let Err(e) = &result {
                warn!(connection_id = %connection, scope, error = %e, "failed to deliver frame");
            }
            report.record(result);
        }
        report
    }
}

impl GroupTransport for InMemoryGroups {
    fn attach(&self, connection: ConnectionId, sink: Arc<dyn ConnectionSink>) {
        self.sinks.write().insert(connection, sink);
    }

    fn detach(&self, connection: &ConnectionId) {
        self.sinks.write().remove(connection);
        let labels = self.subscriptions.write().remove(connection).unwrap_or_default();
        let mut groups = self.groups.write();
        for label in labels {
            if let Some(members) = groups.get_mut(&label) {
                members.remove(connection);
                if members.is_empty() {
                    groups.remove(&label);
                }
            }
        }
    }

    fn subscribe(&self, connection: &ConnectionId, group: &GroupLabel) -> bool {
        // Held until both maps are updated so a concurrent detach cannot slip in between
        let sinks = self.sinks.read();
        if !sinks.contains_key(connection) {
            return false;
        }
        self.groups
            .write()
            .entry(group.clone())
            .or_default()
            .insert(connection.clone());
        self.subscriptions
            .write()
            .entry(connection.clone())
            .or_default()
            .insert(group.clone());
        drop(sinks);
        true
    }

    fn unsubscribe(&self, connection: &ConnectionId, group: &GroupLabel) {
        {
            let mut groups = self.groups.write();
            if let Some(members) = groups.get_mut(group) {
                members.remove(connection);
                if members.is_empty() {
                    groups.remove(group);
                }
            }
        }
        if let Some(labels) = self.subscriptions.write().get_mut(connection) {
            labels.remove(group);
        }
    }

    fn publish_to_group(
        &self,
        group: &GroupLabel,
        frame: &Frame,
        except: Option<&ConnectionId>,
    ) -> DeliveryReport {
        let targets: Vec<_> = {
            let sinks = self.sinks.read();
            let groups = self.groups.read();
            match groups.get(group) {
                Some(members) => members
                    .iter()
                    .filter(|c| Some(*c) != except)
                    .filter_map(|c| sinks.get(c).map(|s| (c.clone(), Arc::clone(s))))
                    .collect(),
                None => Vec::new(),
            }
        };
        self.deliver(targets, frame, group.as_str())
    }

    fn send_to(&self, connection: &ConnectionId, frame: &Frame) -> Result<(), DeliveryError> {
        let sink = self
            .sinks
            .read()
            .get(connection)
            .cloned()
            .ok_or(DeliveryError::UnknownConnection)?;
        sink.send(Arc::clone(frame))
    }

    fn publish_all(&self, frame: &Frame) -> DeliveryReport {
        let targets: Vec<_> = self
            .sinks
            .read()
            .iter()
            .map(|(c, s)| (c.clone(), Arc::clone(s)))
            .collect();
        self.deliver(targets, frame, "all")
    }

    fn connection_count(&self) -> usize {
        self.sinks.read().len()
    }
}
