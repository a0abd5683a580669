//! Local sync agent: the offline mutation queue behind a small REST surface.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod main_lib;

pub use main_lib::{app_router, build_state, AppState};
