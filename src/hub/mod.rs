//! Server-side real-time hub
//!
//! - `registry`: user → live connections
//! - `membership`: conversation → users that joined it
//! - `groups`: transport-independent group fan-out
//! - `broadcast`: the hub tying them together

pub mod broadcast;
pub mod groups;
pub mod membership;
pub mod registry;

pub use broadcast::{BroadcastHub, HubConnection, HubStats, NotificationSender};
pub use groups::{
    ChannelSink, ConnectionSink, DeliveryError, DeliveryReport, Frame, GroupTransport,
    InMemoryGroups,
};
pub use membership::ConversationMembership;
pub use registry::ConnectionRegistry;
