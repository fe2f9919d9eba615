//! Process-visible Internal Processor Registers.
//!
//! Some IPRs are context-switched per process (ASN, ESP/KSP/SSP/USP, FEN,
//! PCBB, PTBR, SYSPTBR, VIRBND, VPTB), some are process-wide (IPL, MCES,
//! PRBR, SCBB), and some are write-only pseudo-registers (TBIA, TBIAP,
//! TBIS, TBISD, TBISI) that trigger TLB operations rather than storing
//! state; those are dispatched by the caller directly to the ITB/DTB and
//! have no backing field here.

/// The process-visible IPR set.
#[derive(Debug, Clone)]
pub struct IprSet {
    pub asn: u64,
    pub asten: u8,
    pub astsr: u8,
    pub esp: u64,
    pub ksp: u64,
    pub ssp: u64,
    pub usp: u64,
    pub fen: bool,
    pub ipl: u8,
    pub mces: u8,
    pub pcbb: u64,
    pub prbr: u64,
    pub ptbr: u64,
    pub scbb: u64,
    pub sirr: u8,
    pub sisr: u16,
    pub sysptbr: u64,
    pub virbnd: u64,
    pub vptb: u64,
    pub whami: u64,
    /// Architectural-capability mask. Set once at construction from
    /// configuration and immutable for the lifetime of the CPU.
    amask: u64,
}

impl IprSet {
    #[must_use]
    pub fn new(amask: u64) -> Self {
        Self {
            asn: 0,
            asten: 0,
            astsr: 0,
            esp: 0,
            ksp: 0,
            ssp: 0,
            usp: 0,
            fen: false,
            ipl: 0,
            mces: 0,
            pcbb: 0,
            prbr: 0,
            ptbr: 0,
            scbb: 0,
            sirr: 0,
            sisr: 0,
            sysptbr: 0,
            virbnd: 0,
            vptb: 0,
            whami: 0,
            amask,
        }
    }

    #[must_use]
    pub fn amask(&self) -> u64 {
        self.amask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amask_is_set_at_construction_and_read_only() {
        let iprs = IprSet::new(0x0302_0001);
        assert_eq!(iprs.amask(), 0x0302_0001);
    }
}
