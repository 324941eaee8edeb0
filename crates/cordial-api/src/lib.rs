//! Table access for the chat client: the `Backend` trait and its hosted,
//! local and media-search implementations.

pub mod backend;
pub mod error;
pub mod local;
pub mod media;
pub mod rest;

pub use backend::{Backend, SharedBackend};
pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use media::MediaSearch;
pub use rest::RestBackend;
