//! Core traits and types shared by the AXP 21264 emulator crates.
//!
//! The pipeline is a single-step state machine: one call to `tick()` per
//! emulated cycle, everything else derived from that. No exceptions.

mod clock;
mod observable;
mod tickable;
mod ticks;

pub use clock::MasterClock;
pub use observable::{Observable, Value};
pub use tickable::Tickable;
pub use ticks::Ticks;
