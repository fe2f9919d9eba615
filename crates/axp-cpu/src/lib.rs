//! Architectural register file, IPRs, PC composite type, floating-point
//! register formats, and the exception model for the AXP 21264.
//!
//! Per-CPU state is a single `Cpu` value owned by the top-level scheduler
//! and passed explicitly to every component operation, rather than kept as
//! a process-wide singleton.

mod cpu;
mod exception;
mod fp;
mod ipr;
mod pc;
mod pte;
mod register;

pub use cpu::Cpu;
pub use exception::{Exception, ExceptionInfo, Mode};
pub use fp::{g_to_d, FpLongword, FpQuadword, IeeeS, IeeeT, IeeeX, VaxD, VaxF, VaxG};
pub use ipr::IprSet;
pub use pc::Pc;
pub use pte::{GranularityHint, Pte};
pub use register::{FpRegisterFile, IntRegisterFile, REGISTER_COUNT};
