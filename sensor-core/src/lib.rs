#![no_std]

// Power, time and battery coordination for the field sensing node.
//
// Nothing in here touches hardware directly. The firmware and the host
// emulator provide the capability traits (`PowerHal`, `RtcBus`,
// `FuelGauge`) and drive the same logic.

pub mod battery;
pub mod clock;
pub mod cycle;
pub mod error;
pub mod power;
pub mod schedule;
pub mod sequences;
pub mod telemetry;

pub use error::{Fault, HardwareFault, ResourceExhaustion, ValidationFault};
