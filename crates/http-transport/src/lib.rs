//! `Transport` implementation over reqwest.
//!
//! Non-2xx responses are returned as responses; only failures that produced
//! no readable response become errors.

pub mod client;
pub mod error;

pub use client::RestTransport;
pub use error::{HttpTransportError, Result, RetryClass};
