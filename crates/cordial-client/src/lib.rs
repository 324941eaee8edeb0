//! Client-side view state for the chat app.
//!
//! Every view loads its rows once, then keeps them current from change
//! events (`apply`) and applies its own writes optimistically.

pub mod announcement;
pub mod auth;
pub mod channels;
pub mod chat;
pub mod error;
pub mod forward;
pub mod members;
pub mod presence;
pub mod reactions;
pub mod servers;
pub mod session;
pub mod settings;
pub mod unread;

pub use error::{ClientError, ClientResult};
