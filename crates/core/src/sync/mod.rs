//! Offline mutation queue and synchronization engine.

mod connectivity;
mod mode_controller;
mod mutation_model;
mod mutation_queue;
mod service;
mod sync_engine;
mod sync_scheduler;

pub use connectivity::*;
pub use mode_controller::*;
pub use mutation_model::*;
pub use mutation_queue::*;
pub use service::*;
pub use sync_engine::*;
pub use sync_scheduler::*;
