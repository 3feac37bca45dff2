//! Hookrelay core library: pending-response correlator, relay agent, host event bus,
//! settings, and the gateway that ties them to HTTP.

pub mod config;
pub mod correlator;
pub mod events;
pub mod gateway;
pub mod relay;
pub mod settings;
