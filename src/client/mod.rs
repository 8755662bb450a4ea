//! Client side of the hub: one supervised connection per session

pub mod backoff;
pub mod subscribers;
pub mod supervisor;
pub mod transport;

pub use backoff::{BackoffStrategy, ExponentialBackoff, RetryState};
pub use subscribers::{EventSubscribers, Subscription, TypingEvent};
pub use supervisor::{ConnectionSupervisor, CredentialSource, SupervisorState};
pub use transport::{HubConnector, HubLink, WsConnector};
