//! Change-feed plumbing: the in-process dispatcher used by the local store,
//! the hosted realtime socket client, and the `Subscription` both hand out.

pub mod dispatcher;
pub mod error;
pub mod realtime;
pub mod subscription;

pub use dispatcher::Dispatcher;
pub use error::GatewayError;
pub use realtime::RealtimeClient;
pub use subscription::Subscription;
