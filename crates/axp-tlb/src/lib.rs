//! Instruction and Data Translation Buffers.
//!
//! Both are the same content-addressable page map; the only behavioral
//! difference between ITB and DTB is which access kinds the caller probes
//! with (`Fetch` only makes sense against the ITB). A single generic `Tlb`
//! type backs both; callers instantiate one of each.

use axp_cpu::{Exception, GranularityHint, Mode, Pte};

/// Number of fully-associative entries. The 21264 ITB and DTB are both
/// 128-entry.
pub const ENTRY_COUNT: usize = 128;

const PAGE_SHIFT: u32 = 13; // 8 KiB pages

/// The kind of access a translation is being performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Read,
    Write,
    Modify,
}

/// A resolved translation: a physical address plus the matched entry's
/// access-control bits, so the caller doesn't need to probe twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub physical_address: u64,
    pub entry_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    va_page: u64,
    pte: Pte,
    asn: u64,
    is_pal: bool,
}

/// A fully-associative translation buffer. `is_pal` in `find`/`insert`
/// selects the PALcode-mode entry subset, mirroring the hardware's
/// separate PAL/non-PAL TLB partitioning.
pub struct Tlb {
    entries: [Option<Entry>; ENTRY_COUNT],
    mru: Option<usize>,
}

impl Tlb {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: [None; ENTRY_COUNT], mru: None }
    }

    /// Finds the entry matching `va` under `asn`, masked by the entry's
    /// granularity hint, with ASM entries matching regardless of ASN.
    pub fn find(&mut self, va: u64, asn: u64, is_pal: bool) -> Option<(usize, Pte)> {
        let va_page = va >> PAGE_SHIFT;
        let found = self.entries.iter().enumerate().find_map(|(i, slot)| {
            let entry = (*slot)?;
            if entry.is_pal != is_pal {
                return None;
            }
            let low_bits = entry.pte.granularity_hint().low_bits();
            if (entry.va_page >> low_bits) != (va_page >> low_bits) {
                return None;
            }
            if !entry.pte.address_space_match() && entry.asn != asn {
                return None;
            }
            Some((i, entry.pte))
        });

        if let Some((i, _)) = found {
            self.mru = Some(i);
        }
        found
    }

    /// Inserts a new entry, evicting one if the buffer is full. Replacement
    /// is not-most-recently-used among non-ASM entries; ASM entries are
    /// preferred to stay resident but may be evicted if no non-ASM entry is
    /// available. Ties break on lowest-indexed slot.
    ///
    /// Any existing entry that would simultaneously match the new one under
    /// `find`'s predicate is cleared first, so two entries for the same
    /// `(page, asn, is_pal)` are never resident at once.
    pub fn insert(&mut self, va: u64, pte: Pte, asn: u64, is_pal: bool) {
        let va_page = va >> PAGE_SHIFT;
        let new_entry = Entry { va_page, pte, asn, is_pal };

        self.evict_colliding(va_page, asn, is_pal);

        if let Some(free) = self.entries.iter().position(Option::is_none) {
            self.entries[free] = Some(new_entry);
            self.mru = Some(free);
            return;
        }

        let victim = self.pick_victim();
        self.entries[victim] = Some(new_entry);
        self.mru = Some(victim);
    }

    /// Clears any resident entry that would match `(va_page, asn, is_pal)`
    /// under the same rule `find` uses to match a lookup.
    fn evict_colliding(&mut self, va_page: u64, asn: u64, is_pal: bool) {
        for slot in &mut self.entries {
            let collides = slot.is_some_and(|entry| {
                if entry.is_pal != is_pal {
                    return false;
                }
                let low_bits = entry.pte.granularity_hint().low_bits();
                if (entry.va_page >> low_bits) != (va_page >> low_bits) {
                    return false;
                }
                entry.pte.address_space_match() || entry.asn == asn
            });
            if collides {
                *slot = None;
            }
        }
    }

    fn pick_victim(&self) -> usize {
        let non_asm_candidate = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, slot)| {
                slot.is_some_and(|e| !e.pte.address_space_match()) && Some(*i) != self.mru
            })
            .map(|(i, _)| i)
            .next();
        if let Some(i) = non_asm_candidate {
            return i;
        }

        self.entries
            .iter()
            .enumerate()
            .filter(|(i, slot)| slot.is_some() && Some(*i) != self.mru)
            .map(|(i, _)| i)
            .next()
            .unwrap_or(0)
    }

    /// Invalidates every entry (TBIA), or only PAL-mode entries when
    /// `is_pal` is true.
    pub fn invalidate_all(&mut self, is_pal: bool) {
        for slot in &mut self.entries {
            if slot.is_some_and(|e| e.is_pal == is_pal) {
                *slot = None;
            }
        }
        self.mru = None;
    }

    /// TBIAP: invalidates all non-ASM entries.
    pub fn invalidate_all_process(&mut self, is_pal: bool) {
        for slot in &mut self.entries {
            if slot.is_some_and(|e| e.is_pal == is_pal && !e.pte.address_space_match()) {
                *slot = None;
            }
        }
    }

    /// TBIS: invalidates the single entry matching `va`, if any.
    pub fn invalidate_single(&mut self, va: u64, is_pal: bool) {
        let va_page = va >> PAGE_SHIFT;
        for slot in &mut self.entries {
            let remove = slot.is_some_and(|e| {
                e.is_pal == is_pal
                    && (e.va_page >> e.pte.granularity_hint().low_bits())
                        == (va_page >> e.pte.granularity_hint().low_bits())
            });
            if remove {
                *slot = None;
            }
        }
    }

    /// Checks fault-on-{read,write,execute} bits, then per-mode enables,
    /// for a matched entry.
    #[must_use]
    pub fn check_access(pte: Pte, kind: AccessKind, mode: Mode) -> Option<Exception> {
        match kind {
            AccessKind::Fetch if pte.fault_on_execute() => return Some(Exception::FaultOnExecute),
            AccessKind::Read | AccessKind::Modify if pte.fault_on_read() => {
                return Some(Exception::FaultOnRead)
            }
            AccessKind::Write if pte.fault_on_write() => return Some(Exception::FaultOnWrite),
            _ => {}
        }

        let enabled = match kind {
            AccessKind::Fetch | AccessKind::Read => match mode {
                Mode::Kernel => pte.kernel_read_enabled(),
                Mode::Executive => pte.executive_read_enabled(),
                Mode::Supervisor => pte.supervisor_read_enabled(),
                Mode::User => pte.user_read_enabled(),
            },
            AccessKind::Write | AccessKind::Modify => match mode {
                Mode::Kernel => pte.kernel_write_enabled(),
                Mode::Executive => pte.executive_write_enabled(),
                Mode::Supervisor => pte.supervisor_write_enabled(),
                Mode::User => pte.user_write_enabled(),
            },
        };

        if enabled {
            None
        } else {
            Some(Exception::AccessControlViolation)
        }
    }

    /// Resolves the physical page frame for `va` given a matched entry,
    /// replacing the low page-offset bits covered by the granularity hint
    /// with the corresponding VA bits.
    #[must_use]
    pub fn resolve_physical_address(va: u64, pte: Pte) -> u64 {
        let low_bits = pte.granularity_hint().low_bits();
        let base_frame = u64::from(pte.page_frame_number());
        let mask = (1u64 << low_bits) - 1;
        let frame = (base_frame & !mask) | ((va >> PAGE_SHIFT) & mask);
        (frame << PAGE_SHIFT) | (va & ((1 << PAGE_SHIFT) - 1))
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

/// Single entry point for virtual-to-physical translation: consults the
/// ITB for `Fetch` accesses and the DTB otherwise. PALcode-mode accesses
/// use the low 43 bits of the VA as the PA directly, bypassing translation.
pub fn va_to_pa(
    itb: &mut Tlb,
    dtb: &mut Tlb,
    va: u64,
    asn: u64,
    is_pal_mode: bool,
    kind: AccessKind,
    current_mode: Mode,
) -> Result<Translation, Exception> {
    if is_pal_mode {
        return Ok(Translation { physical_address: va & 0x7_ffff_ffff_ffff, entry_index: usize::MAX });
    }

    let tlb = if kind == AccessKind::Fetch { itb } else { dtb };
    let (index, pte) = tlb.find(va, asn, false).ok_or(Exception::TranslationNotValid)?;
    if let Some(exception) = Tlb::check_access(pte, kind, current_mode) {
        return Err(exception);
    }
    Ok(Translation {
        physical_address: Tlb::resolve_physical_address(va, pte),
        entry_index: index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rwe_all(mut pte: Pte) -> Pte {
        pte.0 |= 0b1111_1111_0000_0000; // all per-mode read/write enable bits
        pte
    }

    #[test]
    fn find_matches_masked_va_and_asn() {
        let mut tlb = Tlb::new();
        let pte = rwe_all(Pte(0).with_page_frame_number(0x10));
        tlb.insert(0x2000, pte, 1, false);
        assert!(tlb.find(0x2000, 1, false).is_some());
        assert!(tlb.find(0x2000, 2, false).is_none());
    }

    #[test]
    fn tbis_invalidates_only_matching_entry() {
        let mut tlb = Tlb::new();
        let pte = rwe_all(Pte(0));
        tlb.insert(0x0000, pte, 1, false);
        tlb.insert(0x8000, pte, 1, false);

        tlb.invalidate_single(0x0000, false);

        assert!(tlb.find(0x0000, 1, false).is_none());
        assert!(tlb.find(0x8000, 1, false).is_some());
    }

    #[test]
    fn check_access_reports_fault_on_read_before_mode_bits() {
        let mut pte = Pte(0);
        pte.0 |= 0b10; // fault-on-read
        let result = Tlb::check_access(pte, AccessKind::Read, Mode::Kernel);
        assert_eq!(result, Some(Exception::FaultOnRead));
    }

    #[test]
    fn check_access_without_mode_enable_is_access_violation() {
        let pte = Pte(0);
        let result = Tlb::check_access(pte, AccessKind::Read, Mode::User);
        assert_eq!(result, Some(Exception::AccessControlViolation));
    }

    #[test]
    fn insert_evicts_colliding_entry_for_same_page_and_asn() {
        let mut tlb = Tlb::new();
        let pte = rwe_all(Pte(0).with_page_frame_number(0x10));
        tlb.insert(0x2000, pte, 1, false);
        assert!(tlb.find(0x2000, 1, false).is_some());

        let new_pte = rwe_all(Pte(0).with_page_frame_number(0x20));
        tlb.insert(0x2000, new_pte, 1, false);

        let remaining = tlb
            .entries
            .iter()
            .filter(|slot| slot.is_some_and(|e| e.va_page == 0x2000 >> PAGE_SHIFT))
            .count();
        assert_eq!(remaining, 1);
        assert_eq!(tlb.find(0x2000, 1, false), Some((tlb.mru.unwrap(), new_pte)));
    }

    #[test]
    fn insert_replaces_oldest_non_mru_entry_when_full() {
        let mut tlb = Tlb::new();
        let pte = rwe_all(Pte(0));
        for i in 0..ENTRY_COUNT as u64 {
            tlb.insert(i << 13, pte, 1, false);
        }
        // Touch slot 0 so it becomes MRU and should survive the next insert.
        tlb.find(0, 1, false);
        tlb.insert((ENTRY_COUNT as u64) << 13, pte, 1, false);
        assert!(tlb.find(0, 1, false).is_some());
    }
}
