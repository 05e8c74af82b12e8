pub mod client;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod planner;
mod record;
pub mod spatial;
pub mod store;
