//! Offline mutation queue and synchronization engine.
//!
//! Writes made while the client is disconnected are recorded in a persisted
//! FIFO queue and replayed against the REST backend once connectivity (raw
//! network presence AND the user's online mode) is available again.

pub mod errors;
pub mod events;
pub mod storage;
pub mod sync;
pub mod transport;

pub use errors::{Error, Result, StorageError};
