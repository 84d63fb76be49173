//! API handlers module

pub mod events;
pub mod health;
pub mod runs;
