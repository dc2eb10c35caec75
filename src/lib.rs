//! Library crate for lan-probe-rs: probe primitives, the phased port test,
//! the single-task orchestrator and the bounded event delivery loop.
pub mod bulk;
pub mod config;
pub mod delivery;
pub mod devices;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod targets;
pub mod types;
