//! A PTP/IP Initiator: dials a Responder over its three TCP channels, drives
//! PTP transactions with optional data phases, dispatches asynchronous
//! events, and accommodates vendor dialects (currently Fuji) that deviate
//! from the base standard.

pub mod client;
pub mod error;
pub mod fuji;
mod router;
pub mod transaction;
pub mod vendor;

pub use client::{
    Client, Initiator, Responder, State, DEFAULT_OPERATION_TIMEOUT, DEFAULT_PORT,
    INITIATOR_FRIENDLY_NAME,
};
pub use error::{Error, Result};
pub use transaction::DeviceInfo;
pub use vendor::VendorExtensions;
