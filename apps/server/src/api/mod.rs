pub mod health;
pub mod sync;
