use crate::exception::Mode;
use crate::ipr::IprSet;
use crate::pc::Pc;
use crate::register::{FpRegisterFile, IntRegisterFile};

/// Per-CPU architectural state: register files, IPRs, current PC and
/// privilege mode. Caches, TLBs, and the Cbox mailbox are owned alongside
/// this by the top-level scheduler and passed to component operations as
/// separate arguments, rather than nested inside a singleton.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub int_registers: IntRegisterFile,
    pub fp_registers: FpRegisterFile,
    pub iprs: IprSet,
    pub pc: Pc,
    pub mode: Mode,
}

impl Cpu {
    /// Constructs a CPU with the given AMASK, reset to kernel mode at PC 0.
    #[must_use]
    pub fn new(amask: u64) -> Self {
        Self {
            int_registers: IntRegisterFile::new(),
            fp_registers: FpRegisterFile::new(),
            iprs: IprSet::new(amask),
            pc: Pc::new(0, true),
            mode: Mode::Kernel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cpu_starts_in_kernel_mode_at_pal_pc() {
        let cpu = Cpu::new(0);
        assert_eq!(cpu.mode, Mode::Kernel);
        assert!(cpu.pc.is_pal());
    }
}
