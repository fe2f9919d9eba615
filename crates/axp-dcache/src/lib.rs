//! Two-way set-associative Data Cache: write-back, allocate-on-write-miss,
//! MESI-like coherence, a one-entry victim buffer, and load-locked /
//! store-conditional tracking.
//!
//! Physical addresses only: virtual-to-physical translation happens
//! upstream (the DTB), and the Cbox mailbox that outbound messages here
//! feed into lives in its own crate, so this crate has no dependency on
//! either and cannot form a cycle with them.

use axp_util::endian::AccessSize;

pub const CACHE_SIZE: usize = 64 * 1024;
pub const LINE_SIZE: usize = 64;
pub const WAYS: usize = 2;
pub const LINES_PER_SET: usize = CACHE_SIZE / WAYS / LINE_SIZE;

/// MESI-like coherence state of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

/// A message destined for the Cbox outbound queue. The caller drains these
/// after each operation and hands them to the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    ReadBlock(u64),
    ReadBlockMod(u64),
    WriteBlock(u64, [u8; LINE_SIZE]),
    Evict(u64),
    InvalToDirty(u64),
    CleanShared(u64),
}

#[derive(Debug, Clone, Copy)]
struct DcacheLine {
    data: [u8; LINE_SIZE],
    physical_tag: u64,
    valid: bool,
    state: CoherenceState,
    locked: bool,
}

impl DcacheLine {
    fn empty() -> Self {
        Self {
            data: [0; LINE_SIZE],
            physical_tag: 0,
            valid: false,
            state: CoherenceState::Invalid,
            locked: false,
        }
    }
}

/// Returned by a successful probe so a following `read`/`write` can act
/// without re-probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcacheLocation {
    pub index: usize,
    pub way: usize,
    pub state_before: CoherenceState,
}

/// Result of `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Hit(DcacheLocation),
    /// Hit, but the line is Shared and the access is a write: a
    /// probe-for-ownership upgrade (`InvalToDirty`) must complete before
    /// the write may be committed.
    HitNeedsUpgrade(DcacheLocation),
    Miss,
}

struct Way {
    lines: [DcacheLine; LINES_PER_SET],
}

impl Way {
    fn new() -> Self {
        Self { lines: [DcacheLine::empty(); LINES_PER_SET] }
    }
}

fn index_of(pa: u64) -> usize {
    ((pa >> 6) as usize) & (LINES_PER_SET - 1)
}

fn line_tag(pa: u64) -> u64 {
    pa & !(LINE_SIZE as u64 - 1)
}

pub struct Dcache {
    ways: [Way; WAYS],
    lru_way: [usize; LINES_PER_SET],
    victim: Option<DcacheLine>,
}

impl Dcache {
    #[must_use]
    pub fn new() -> Self {
        Self { ways: [Way::new(), Way::new()], lru_way: [0; LINES_PER_SET], victim: None }
    }

    fn find(&self, pa: u64) -> Option<(usize, usize)> {
        let index = index_of(pa);
        let tag = line_tag(pa);
        (0..WAYS).find_map(|way| {
            let line = self.ways[way].lines[index];
            (line.valid && line.physical_tag == tag).then_some((way, index))
        })
    }

    /// Probes for `pa`. Reports whether the access can proceed and, for a
    /// Shared-state write, that an ownership upgrade is needed first.
    #[must_use]
    pub fn status(&self, pa: u64, is_write: bool) -> StatusOutcome {
        match self.find(pa) {
            None => StatusOutcome::Miss,
            Some((way, index)) => {
                let state = self.ways[way].lines[index].state;
                let loc = DcacheLocation { index, way, state_before: state };
                if is_write && state == CoherenceState::Shared {
                    StatusOutcome::HitNeedsUpgrade(loc)
                } else {
                    StatusOutcome::Hit(loc)
                }
            }
        }
    }

    /// Copies `size` bytes at `pa`'s big-endian-adjusted offset into `out`.
    /// Returns `None` on miss, leaving cache state untouched.
    #[must_use]
    pub fn read(&self, pa: u64, size: AccessSize, big_endian: bool, out: &mut [u8]) -> Option<()> {
        let (way, index) = self.find(pa)?;
        let offset = Self::byte_offset(pa, size, big_endian);
        let len = size.bytes() as usize;
        out[..len].copy_from_slice(&self.ways[way].lines[index].data[offset..offset + len]);
        Some(())
    }

    /// Commits a write at `loc`. Requires the location's state to be E or
    /// M; the line transitions to M. Returns `false` (no state change) if
    /// the precondition doesn't hold, signalling the caller to re-probe
    /// after an ownership upgrade.
    pub fn write(
        &mut self,
        loc: DcacheLocation,
        pa: u64,
        size: AccessSize,
        big_endian: bool,
        data: &[u8],
    ) -> bool {
        if !matches!(loc.state_before, CoherenceState::Exclusive | CoherenceState::Modified) {
            return false;
        }
        let offset = Self::byte_offset(pa, size, big_endian);
        let len = size.bytes() as usize;
        let line = &mut self.ways[loc.way].lines[loc.index];
        line.data[offset..offset + len].copy_from_slice(&data[..len]);
        line.state = CoherenceState::Modified;
        true
    }

    fn byte_offset(pa: u64, size: AccessSize, big_endian: bool) -> usize {
        let mut offset = (pa as usize) & (LINE_SIZE - 1);
        if big_endian {
            offset ^= size.big_endian_mask() as usize;
        }
        offset
    }

    /// Fills a line from the Bcache/memory response, transitioning it to
    /// whichever of S/E the system granted.
    pub fn copy_from_bcache(&mut self, pa: u64, data: &[u8; LINE_SIZE], granted: CoherenceState) {
        let index = index_of(pa);
        let tag = line_tag(pa);
        let way = self.choose_fill_way(index);

        if let Some(evicted) = self.evict_for_fill(way, index) {
            self.victim = Some(evicted);
        }

        self.ways[way].lines[index] =
            DcacheLine { data: *data, physical_tag: tag, valid: true, state: granted, locked: false };
        self.lru_way[index] = 1 - way;
    }

    fn choose_fill_way(&self, index: usize) -> usize {
        for way in 0..WAYS {
            if !self.ways[way].lines[index].valid {
                return way;
            }
        }
        self.lru_way[index]
    }

    fn evict_for_fill(&self, way: usize, index: usize) -> Option<DcacheLine> {
        let line = self.ways[way].lines[index];
        line.valid.then_some(line)
    }

    /// Forces the line containing `pa` to Invalid. Returns a write-back
    /// message if the line was Modified.
    pub fn evict(&mut self, pa: u64) -> Option<OutboundMessage> {
        let (way, index) = self.find(pa)?;
        let line = &mut self.ways[way].lines[index];
        let message = (line.state == CoherenceState::Modified)
            .then(|| OutboundMessage::WriteBlock(line.physical_tag, line.data));
        line.state = CoherenceState::Invalid;
        line.valid = false;
        line.locked = false;
        message
    }

    /// Invalidates every line, emitting a write-back for each that was
    /// Modified.
    pub fn flush(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        for way in &mut self.ways {
            for line in &mut way.lines {
                if line.valid && line.state == CoherenceState::Modified {
                    messages.push(OutboundMessage::WriteBlock(line.physical_tag, line.data));
                }
                *line = DcacheLine::empty();
            }
        }
        messages
    }

    /// Marks the line at `pa` load-locked, for a following `LDL_L`/`STL_C`
    /// pair. No-op if the line isn't resident.
    pub fn lock(&mut self, pa: u64) {
        if let Some((way, index)) = self.find(pa) {
            self.ways[way].lines[index].locked = true;
        }
    }

    /// Consumes the lock set by `lock`: true if it was still held (no
    /// intervening invalidation/eviction touched the line), false
    /// otherwise. Always clears the lock.
    pub fn check_and_clear_lock(&mut self, pa: u64) -> bool {
        match self.find(pa) {
            Some((way, index)) => {
                let line = &mut self.ways[way].lines[index];
                let was_locked = line.locked;
                line.locked = false;
                was_locked
            }
            None => false,
        }
    }

    /// Local read access to a line already known resident: S/E/M are
    /// unaffected. Returns the state actually present, for cases the
    /// caller raced a probe between `status` and this call.
    #[must_use]
    pub fn local_read_state(&self, pa: u64) -> Option<CoherenceState> {
        self.find(pa).map(|(way, index)| self.ways[way].lines[index].state)
    }

    /// Applies the coherence effect of a local write to a resident line,
    /// per the I/S/E/M transition table. Returns the outbound message the
    /// transition requires, if any. Assumes the caller already resolved a
    /// `HitNeedsUpgrade` status (the line is not left in S by a write).
    pub fn apply_local_write(&mut self, pa: u64) -> Option<OutboundMessage> {
        let (way, index) = self.find(pa)?;
        let line = &mut self.ways[way].lines[index];
        let message = match line.state {
            CoherenceState::Shared => Some(OutboundMessage::InvalToDirty(line.physical_tag)),
            CoherenceState::Exclusive | CoherenceState::Modified => None,
            CoherenceState::Invalid => None,
        };
        line.state = CoherenceState::Modified;
        message
    }

    /// Applies an inbound `ProbeShared`: E downgrades to S (with a
    /// `CleanShared` acknowledgement), M writes back and downgrades to S,
    /// I and S are unaffected.
    pub fn apply_probe_shared(&mut self, pa: u64) -> Option<OutboundMessage> {
        let (way, index) = self.find(pa)?;
        let line = &mut self.ways[way].lines[index];
        match line.state {
            CoherenceState::Exclusive => {
                line.state = CoherenceState::Shared;
                Some(OutboundMessage::CleanShared(line.physical_tag))
            }
            CoherenceState::Modified => {
                let message = OutboundMessage::WriteBlock(line.physical_tag, line.data);
                line.state = CoherenceState::Shared;
                Some(message)
            }
            CoherenceState::Invalid | CoherenceState::Shared => None,
        }
    }

    /// Applies an inbound `ProbeInvalidate`: M writes back first, then any
    /// non-Invalid state drops to Invalid and its lock (if any) is
    /// cleared.
    pub fn apply_probe_invalidate(&mut self, pa: u64) -> Option<OutboundMessage> {
        let (way, index) = self.find(pa)?;
        let line = &mut self.ways[way].lines[index];
        let message = (line.state == CoherenceState::Modified)
            .then(|| OutboundMessage::WriteBlock(line.physical_tag, line.data));
        line.state = CoherenceState::Invalid;
        line.valid = false;
        line.locked = false;
        message
    }

    /// Physical tag of the line currently held in the victim buffer, if
    /// any.
    #[must_use]
    pub fn victim_tag(&self) -> Option<u64> {
        self.victim.as_ref().map(|line| line.physical_tag)
    }
}

impl Default for Dcache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(dcache: &mut Dcache, pa: u64, state: CoherenceState) {
        dcache.copy_from_bcache(pa, &[0; LINE_SIZE], state);
    }

    #[test]
    fn miss_then_fill_then_hit() {
        let mut dcache = Dcache::new();
        assert_eq!(dcache.status(0x1000, false), StatusOutcome::Miss);
        fill(&mut dcache, 0x1000, CoherenceState::Shared);
        assert!(matches!(dcache.status(0x1000, false), StatusOutcome::Hit(_)));
    }

    #[test]
    fn write_to_shared_line_needs_upgrade_first() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x2000, CoherenceState::Shared);
        assert!(matches!(dcache.status(0x2000, true), StatusOutcome::HitNeedsUpgrade(_)));

        let message = dcache.apply_local_write(0x2000);
        assert_eq!(message, Some(OutboundMessage::InvalToDirty(0x2000)));
        assert!(matches!(dcache.status(0x2000, true), StatusOutcome::Hit(_)));
    }

    #[test]
    fn exclusive_write_is_silent_upgrade() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x3000, CoherenceState::Exclusive);
        let message = dcache.apply_local_write(0x3000);
        assert_eq!(message, None);
        assert_eq!(dcache.local_read_state(0x3000), Some(CoherenceState::Modified));
    }

    #[test]
    fn probe_invalidate_on_modified_line_writes_back() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x4000, CoherenceState::Exclusive);
        dcache.apply_local_write(0x4000);

        let message = dcache.apply_probe_invalidate(0x4000);
        assert!(matches!(message, Some(OutboundMessage::WriteBlock(0x4000, _))));
        assert_eq!(dcache.status(0x4000, false), StatusOutcome::Miss);
    }

    #[test]
    fn probe_shared_on_exclusive_line_downgrades_without_writeback() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x5000, CoherenceState::Exclusive);
        let message = dcache.apply_probe_shared(0x5000);
        assert_eq!(message, Some(OutboundMessage::CleanShared(0x5000)));
        assert_eq!(dcache.local_read_state(0x5000), Some(CoherenceState::Shared));
    }

    #[test]
    fn store_conditional_fails_after_intervening_probe_invalidate() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x6000, CoherenceState::Exclusive);
        dcache.lock(0x6000);
        dcache.apply_probe_invalidate(0x6000);
        assert!(!dcache.check_and_clear_lock(0x6000));
    }

    #[test]
    fn store_conditional_succeeds_with_no_intervening_invalidation() {
        let mut dcache = Dcache::new();
        fill(&mut dcache, 0x7000, CoherenceState::Exclusive);
        dcache.lock(0x7000);
        assert!(dcache.check_and_clear_lock(0x7000));
        assert!(!dcache.check_and_clear_lock(0x7000));
    }

    #[test]
    fn two_cpu_write_invalidates_remote_shared_copy() {
        // Two independent caches standing in for two CPUs on the same bus.
        // CPU A and CPU B both read pa=0x9000 and end up Shared; CPU A then
        // writes it, which (after the Cbox grants ownership) must evict
        // CPU B's copy via a ProbeInvalidate.
        let mut cpu_a = Dcache::new();
        let mut cpu_b = Dcache::new();

        fill(&mut cpu_a, 0x9000, CoherenceState::Shared);
        fill(&mut cpu_b, 0x9000, CoherenceState::Shared);
        assert!(matches!(cpu_a.status(0x9000, true), StatusOutcome::HitNeedsUpgrade(_)));

        let outbound = cpu_a.apply_local_write(0x9000);
        assert_eq!(outbound, Some(OutboundMessage::InvalToDirty(0x9000)));
        assert_eq!(cpu_a.local_read_state(0x9000), Some(CoherenceState::Modified));

        // The Cbox serializes CPU A's upgrade by probing every other cache
        // sharing the line.
        let probe_reply = cpu_b.apply_probe_invalidate(0x9000);
        assert_eq!(probe_reply, None); // CPU B was only Shared, nothing to write back
        assert_eq!(cpu_b.status(0x9000, false), StatusOutcome::Miss);
    }

    #[test]
    fn read_respects_big_endian_byte_lane_swap() {
        let mut dcache = Dcache::new();
        let mut data = [0u8; LINE_SIZE];
        data[0] = 0xaa;
        data[7] = 0xbb;
        dcache.copy_from_bcache(0x8000, &data, CoherenceState::Shared);

        let mut out = [0u8; 1];
        dcache.read(0x8007, AccessSize::Byte, true, &mut out).unwrap();
        assert_eq!(out[0], 0xaa);
    }
}
