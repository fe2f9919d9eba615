//! Two-way set-associative Instruction Cache, virtually indexed and
//! physically tagged, with per-set-index line predictors.

mod decode;
mod predictor;

pub use decode::InstructionType;
pub use predictor::Predictors;

pub const CACHE_SIZE: usize = 64 * 1024;
pub const LINE_SIZE: usize = 64;
pub const WAYS: usize = 2;
pub const INSTRUCTIONS_PER_LINE: usize = LINE_SIZE / 4;
pub const LINES_PER_SET: usize = CACHE_SIZE / WAYS / LINE_SIZE;

/// One cache line: sixteen instructions, their pre-decoded types, a
/// physical tag, validity, and the line predictor's successor-line hint.
/// The fetch engine, not this cache, slices a four-instruction delivery
/// group out of a line on each hit.
#[derive(Debug, Clone, Copy)]
pub struct InsLine {
    pub instructions: [u32; INSTRUCTIONS_PER_LINE],
    pub types: [InstructionType; INSTRUCTIONS_PER_LINE],
    pub physical_tag: u64,
    pub valid: bool,
    pub is_pal: bool,
    pub asn: u64,
    /// Predicted next line index (plain array index into the owning set),
    /// initialized to sequential (index + 1).
    pub next_line_hint: usize,
}

impl InsLine {
    fn empty() -> Self {
        Self {
            instructions: [0; INSTRUCTIONS_PER_LINE],
            types: [InstructionType::Res; INSTRUCTIONS_PER_LINE],
            physical_tag: 0,
            valid: false,
            is_pal: false,
            asn: 0,
            next_line_hint: 0,
        }
    }
}

/// Result of a fetch: a hit returns the line, a miss leaves all state
/// unchanged so the caller can enqueue a fill and replay.
#[derive(Debug, Clone, Copy)]
pub enum FetchResult {
    Hit(InsLine),
    Miss,
}

struct Way {
    lines: [InsLine; LINES_PER_SET],
}

impl Way {
    fn new() -> Self {
        Self { lines: [InsLine::empty(); LINES_PER_SET] }
    }
}

/// The Icache proper: two ways, each `LINES_PER_SET` lines, plus the
/// per-PC-index set predictor.
pub struct Icache {
    ways: [Way; WAYS],
    predictors: Predictors,
    /// Tracks which way was least-recently-filled per index, for the
    /// first-invalid-wins-else-LRU fill policy.
    lru_way: [usize; LINES_PER_SET],
}

impl Icache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ways: [Way::new(), Way::new()],
            predictors: Predictors::new(LINES_PER_SET),
            lru_way: [0; LINES_PER_SET],
        }
    }

    fn index_of(pc: u64) -> usize {
        ((pc >> 6) as usize) & (LINES_PER_SET - 1)
    }

    /// Consults both sets; on hit updates the set predictor with the
    /// winning set. On miss leaves all state unchanged.
    pub fn fetch(&mut self, pc: u64, physical_tag: u64) -> FetchResult {
        let index = Self::index_of(pc);
        for way in 0..WAYS {
            let line = self.ways[way].lines[index];
            if line.valid && line.physical_tag == physical_tag {
                self.predictors.record_hit(index, way);
                return FetchResult::Hit(line);
            }
        }
        FetchResult::Miss
    }

    /// Probes without updating predictors.
    #[must_use]
    pub fn valid(&self, pc: u64, physical_tag: u64) -> bool {
        let index = Self::index_of(pc);
        self.ways.iter().any(|way| {
            let line = way.lines[index];
            line.valid && line.physical_tag == physical_tag
        })
    }

    /// Fills the cache with a 16-instruction block starting at the line
    /// containing `pc`, pre-decoding, physically tagging, and stamping it
    /// with the fill's PALcode mode and address-space number. The way
    /// filled is chosen first-invalid-wins, else least-recently-used.
    pub fn add(&mut self, pc: u64, physical_tag: u64, instructions: &[u32], is_pal: bool, asn: u64) {
        let base_index = Self::index_of(pc);
        for (line_offset, chunk) in instructions.chunks(INSTRUCTIONS_PER_LINE).enumerate() {
            let index = (base_index + line_offset) & (LINES_PER_SET - 1);
            let way = self.choose_fill_way(index);

            let mut line = InsLine::empty();
            for (i, &ins) in chunk.iter().enumerate() {
                line.instructions[i] = ins;
                line.types[i] = decode::classify(ins);
            }
            line.physical_tag = physical_tag + (line_offset as u64 * LINE_SIZE as u64);
            line.valid = true;
            line.is_pal = is_pal;
            line.asn = asn;
            line.next_line_hint = (index + 1) & (LINES_PER_SET - 1);

            self.ways[way].lines[index] = line;
            self.lru_way[index] = 1 - way;
        }
    }

    fn choose_fill_way(&self, index: usize) -> usize {
        for way in 0..WAYS {
            if !self.ways[way].lines[index].valid {
                return way;
            }
        }
        self.lru_way[index]
    }

    /// Clears all entries, or only those with the PAL bit set.
    pub fn flush(&mut self, pal_only: bool) {
        for way in &mut self.ways {
            for line in &mut way.lines {
                if !pal_only || line.is_pal {
                    *line = InsLine::empty();
                }
            }
        }
    }

    #[must_use]
    pub fn predictors(&self) -> &Predictors {
        &self.predictors
    }
}

impl Default for Icache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_fill_then_hit() {
        let mut icache = Icache::new();
        let pc = 0u64;
        assert!(matches!(icache.fetch(pc, 0x1000), FetchResult::Miss));

        let block = [
            0x4be0_173f, 0x43ff_0401, 0x43ff_0521, 0x47ff_0001, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0,
        ];
        icache.add(pc, 0x1000, &block, true, 0);

        match icache.fetch(pc, 0x1000) {
            FetchResult::Hit(line) => {
                assert_eq!(line.instructions[0], 0x4be0_173f);
                assert_eq!(line.instructions[3], 0x47ff_0001);
            }
            FetchResult::Miss => panic!("expected hit after fill"),
        }
    }

    #[test]
    fn flush_pal_only_preserves_non_pal_lines() {
        let mut icache = Icache::new();
        icache.add(0, 0x2000, &[1, 2, 3, 4], true, 0);
        icache.add(0x1000, 0x3000, &[5, 6, 7, 8], false, 0);

        icache.flush(true);

        assert!(matches!(icache.fetch(0, 0x2000), FetchResult::Miss));
        assert!(matches!(icache.fetch(0x1000, 0x3000), FetchResult::Hit(_)));
    }

    #[test]
    fn valid_does_not_update_predictor_state() {
        let mut icache = Icache::new();
        icache.add(0, 0x1000, &[1, 2, 3, 4], false, 0);
        assert!(icache.valid(0, 0x1000));
        assert!(!icache.valid(0, 0x9999));
    }
}
