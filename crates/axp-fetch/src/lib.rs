//! Fetch engine: translates the PC through the ITB, probes the Icache, and
//! hands a four-instruction packet to the Issue Unit (external collaborator,
//! not part of this crate).
//!
//! Holds no reference to the Icache/ITB/mailbox between steps — only the
//! bookkeeping needed to de-duplicate an in-flight fill request, per the
//! cyclic-structure note: the fetch engine addresses caches by index/tag,
//! never by pointer.

use axp_cbox::{InboundProbe, Mailbox, OutboundMessage};
use axp_cpu::{Cpu, Exception, Pc};
use axp_icache::{FetchResult, Icache, InstructionType, LINE_SIZE};
use axp_tlb::{AccessKind, Tlb};

/// Instructions delivered to the Issue Unit per fetch, matching the
/// hardware's four-instruction fetch width (an Icache line holds four of
/// these groups).
pub const FETCH_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct FetchPacket {
    pub pc: Pc,
    pub instructions: [u32; FETCH_WIDTH],
    pub types: [InstructionType; FETCH_WIDTH],
}

#[derive(Debug, Clone, Copy)]
pub enum FetchOutcome {
    Delivered(FetchPacket),
    /// Icache miss; a fill request has been (or already was) enqueued.
    Miss,
    Fault(Exception),
}

#[derive(Debug, Clone, Copy)]
struct PendingFill {
    va: u64,
    pa: u64,
    is_pal: bool,
    asn: u64,
}

pub struct FetchEngine {
    pending_fill: Option<PendingFill>,
}

impl FetchEngine {
    #[must_use]
    pub fn new() -> Self {
        Self { pending_fill: None }
    }

    /// Performs one fetch step for `cpu`'s current PC. `mailbox` is the
    /// Icache's dedicated port; a single-socket design has no external
    /// agent probing instruction lines, so only `FillResponse`s are ever
    /// expected on it.
    pub fn step(
        &mut self,
        cpu: &Cpu,
        itb: &mut Tlb,
        icache: &mut Icache,
        mailbox: &mut Mailbox,
    ) -> FetchOutcome {
        let pc = cpu.pc;
        let va = pc.get_pc();
        let asn = cpu.iprs.asn;
        let line_mask = !(LINE_SIZE as u64 - 1);

        let physical_tag = if pc.is_pal() {
            (va & 0x7_ffff_ffff_ffff) & line_mask
        } else {
            let Some((_, pte)) = itb.find(va, asn, false) else {
                return FetchOutcome::Fault(Exception::TranslationNotValid);
            };
            if let Some(exception) = Tlb::check_access(pte, AccessKind::Fetch, cpu.mode) {
                return FetchOutcome::Fault(exception);
            }
            Tlb::resolve_physical_address(va, pte) & line_mask
        };

        match icache.fetch(va, physical_tag) {
            FetchResult::Hit(line) => {
                self.pending_fill = None;
                let instructions_per_line = LINE_SIZE / 4;
                let index_in_line = (va as usize / 4) % instructions_per_line;
                let start = (index_in_line / FETCH_WIDTH) * FETCH_WIDTH;

                let mut instructions = [0u32; FETCH_WIDTH];
                let mut types = [InstructionType::Res; FETCH_WIDTH];
                instructions.copy_from_slice(&line.instructions[start..start + FETCH_WIDTH]);
                types.copy_from_slice(&line.types[start..start + FETCH_WIDTH]);
                FetchOutcome::Delivered(FetchPacket { pc, instructions, types })
            }
            FetchResult::Miss => {
                let already_pending =
                    self.pending_fill.is_some_and(|pending| pending.pa == physical_tag);
                if !already_pending {
                    mailbox.send(OutboundMessage::ReadBlock(physical_tag));
                    self.pending_fill = Some(PendingFill {
                        va: va & line_mask,
                        pa: physical_tag,
                        is_pal: pc.is_pal(),
                        asn,
                    });
                }
                FetchOutcome::Miss
            }
        }
    }

    /// Drains ready responses on the Icache's mailbox, filling the cache
    /// when a response matches the outstanding request.
    pub fn service_fills(&mut self, icache: &mut Icache, mailbox: &mut Mailbox) {
        while let Some(probe) = mailbox.next_ready() {
            let InboundProbe::FillResponse { pa, data, .. } = probe else { continue };
            let Some(pending) = self.pending_fill else { continue };
            if pending.pa != pa {
                continue;
            }

            let mut instructions = [0u32; LINE_SIZE / 4];
            for (i, word) in instructions.iter_mut().enumerate() {
                let bytes = [data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]];
                *word = u32::from_le_bytes(bytes);
            }
            icache.add(pending.va, pending.pa, &instructions, pending.is_pal, pending.asn);
            self.pending_fill = None;
        }
    }

    #[must_use]
    pub fn has_pending_fill(&self) -> bool {
        self.pending_fill.is_some()
    }
}

impl Default for FetchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axp_cbox::CoherenceState;
    use axp_cpu::{Cpu, Pc};

    fn sample_block() -> [u8; LINE_SIZE] {
        let words: [u32; 4] = [0x4be0_173f, 0x43ff_0401, 0x43ff_0521, 0x47ff_0001];
        let mut data = [0u8; LINE_SIZE];
        for (i, w) in words.iter().enumerate() {
            data[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        data
    }

    #[test]
    fn cold_miss_then_fill_then_hit() {
        let mut cpu = Cpu::new(0);
        cpu.pc = Pc::new(0, true); // PAL mode: bypasses ITB translation
        let mut itb = Tlb::new();
        let mut icache = Icache::new();
        let mut mailbox = Mailbox::new();
        let mut fetch = FetchEngine::new();

        assert!(matches!(fetch.step(&cpu, &mut itb, &mut icache, &mut mailbox), FetchOutcome::Miss));
        assert!(fetch.has_pending_fill());
        assert_eq!(mailbox.drain_outbound(), vec![OutboundMessage::ReadBlock(0)]);

        mailbox.receive(InboundProbe::FillResponse {
            pa: 0,
            data: sample_block(),
            final_state: CoherenceState::Shared,
        });
        fetch.service_fills(&mut icache, &mut mailbox);
        assert!(!fetch.has_pending_fill());

        match fetch.step(&cpu, &mut itb, &mut icache, &mut mailbox) {
            FetchOutcome::Delivered(packet) => {
                assert_eq!(packet.instructions[0], 0x4be0_173f);
                assert_eq!(packet.instructions[3], 0x47ff_0001);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn repeated_miss_does_not_resend_fill_request() {
        let mut cpu = Cpu::new(0);
        cpu.pc = Pc::new(0, true); // PAL mode, so the miss path runs without an ITB entry
        let mut itb = Tlb::new();
        let mut icache = Icache::new();
        let mut mailbox = Mailbox::new();
        let mut fetch = FetchEngine::new();

        fetch.step(&cpu, &mut itb, &mut icache, &mut mailbox);
        fetch.step(&cpu, &mut itb, &mut icache, &mut mailbox);
        assert_eq!(mailbox.drain_outbound(), vec![OutboundMessage::ReadBlock(0)]);
    }

    #[test]
    fn untranslated_non_pal_fetch_faults() {
        let mut cpu = Cpu::new(0);
        cpu.pc = Pc::new(0x1000 >> 2, false);
        let mut itb = Tlb::new();
        let mut icache = Icache::new();
        let mut mailbox = Mailbox::new();
        let mut fetch = FetchEngine::new();

        let outcome = fetch.step(&cpu, &mut itb, &mut icache, &mut mailbox);
        assert!(matches!(outcome, FetchOutcome::Fault(Exception::TranslationNotValid)));
    }
}
