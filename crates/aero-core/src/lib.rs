//! Hardware-independent core of the aero CO₂ node.
//!
//! The node wakes, measures, publishes and goes back to deep sleep. Nothing
//! survives sleep except one CRC-protected record in retention memory, so each
//! boot is a complete run of the [`lifecycle::Lifecycle`] state machine.
//!
//! Everything platform-specific (pins, ADC, radio, retention RAM, the sleep
//! call itself) sits behind small capability traits, which keeps this crate
//! `#![no_std]` and testable on the host.

#![no_std]

pub mod bus;
pub mod config;
pub mod lifecycle;
pub mod network;
pub mod schedule;
pub mod sensors;
pub mod storage;
