use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::board::position::{Move, NO_MOVE};
use crate::search::search::{INF, MATE, MAX_PLY};

pub const BOUND_LOWER: u8 = 1;
pub const BOUND_EXACT: u8 = 2;
pub const BOUND_UPPER: u8 = 3;

const BUCKET_COUNT: usize = 4;
pub const DEFAULT_MB: usize = 64;

const DEPTH_BITS: u64 = 0x1F;
const MOVE_SHIFT: u64 = 5;
const MOVE_BITS: u64 = 0x1F_FFFF;
const BOUND_SHIFT: u64 = 26;
const VALUE_SHIFT: u64 = 28;
const VALUE_BITS: u64 = 0x1_FFFF;
const ID_SHIFT: u64 = 45;
const ID_BITS: u64 = 0x1FF;

/// What a probe told the search it may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Entry is deep enough and its bound allows an immediate return.
    CutoffFound,
    /// Upper-bound entry below beta at null-move depth: a null move
    /// cannot possibly fail high here.
    AvoidNull,
    /// Upper bound known, not tight enough to cut.
    AlphaFound,
    /// Lower bound known, not tight enough to cut.
    BetaFound,
    /// Exact score from a shallower search.
    ExactFound,
    /// Entry matched but is only useful for move ordering.
    OrderingOnly,
    NoMatch,
}

#[derive(Debug, Clone, Copy)]
pub struct TtProbe {
    pub mv: Move,
    pub result: Probe,
    pub score: i32,
    pub depth: i32,
    pub bound: u8,
}

impl TtProbe {
    fn no_match() -> Self {
        TtProbe { mv: NO_MOVE, result: Probe::NoMatch, score: 0, depth: 0, bound: 0 }
    }
}

/// One bucket holds (key ^ data, data). A torn write leaves the pair
/// inconsistent, which the reader detects by re-deriving the key; no
/// locks anywhere on this path.
struct Bucket {
    key: AtomicU64,
    data: AtomicU64,
}

impl Bucket {
    const fn new() -> Self {
        Bucket { key: AtomicU64::new(0), data: AtomicU64::new(0) }
    }
}

#[inline(always)]
fn pack(mv: Move, depth: i32, bound: u8, value: i32, id: u64) -> u64 {
    let depth = depth.clamp(0, 31) as u64;
    let value = (value.clamp(-INF, INF) + INF) as u64;
    depth
        | ((mv.packed() as u64) << MOVE_SHIFT)
        | (((bound & 3) as u64) << BOUND_SHIFT)
        | ((value & VALUE_BITS) << VALUE_SHIFT)
        | ((id & ID_BITS) << ID_SHIFT)
}

#[inline(always)]
fn unpack_depth(data: u64) -> i32 {
    (data & DEPTH_BITS) as i32
}

#[inline(always)]
fn unpack_move(data: u64) -> Move {
    Move::from_packed(((data >> MOVE_SHIFT) & MOVE_BITS) as u32)
}

#[inline(always)]
fn unpack_bound(data: u64) -> u8 {
    ((data >> BOUND_SHIFT) & 3) as u8
}

#[inline(always)]
fn unpack_value(data: u64) -> i32 {
    ((data >> VALUE_SHIFT) & VALUE_BITS) as i32 - INF
}

#[inline(always)]
fn unpack_id(data: u64) -> u64 {
    (data >> ID_SHIFT) & ID_BITS
}

/// Mate scores are stored relative to the probing node so they stay
/// meaningful when found again at a different ply.
#[inline(always)]
pub fn score_to_tt(score: i32, ply: usize) -> i32 {
    if score >= MATE - MAX_PLY as i32 {
        score + ply as i32
    } else if score <= -MATE + MAX_PLY as i32 {
        score - ply as i32
    } else {
        score
    }
}

#[inline(always)]
pub fn score_from_tt(score: i32, ply: usize) -> i32 {
    if score >= MATE - MAX_PLY as i32 {
        score - ply as i32
    } else if score <= -MATE + MAX_PLY as i32 {
        score + ply as i32
    } else {
        score
    }
}

/// 4-way set-associative shared transposition table, one contiguous
/// allocation, never resized during search.
pub struct TranspositionTable {
    slots: Box<[[Bucket; BUCKET_COUNT]]>,
    mask: u64,
    search_id: AtomicU32,
}

impl TranspositionTable {
    pub fn new_from_mb(megabytes: usize) -> Self {
        let bytes = megabytes.max(1) * 1024 * 1024;
        let slot_bytes = BUCKET_COUNT * std::mem::size_of::<Bucket>();
        // largest power of two that fits the requested size
        let slot_count = (bytes / slot_bytes + 1).next_power_of_two() / 2;
        Self::new(slot_count.max(1024))
    }

    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count.is_power_of_two());
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push([Bucket::new(), Bucket::new(), Bucket::new(), Bucket::new()]);
        }
        Self {
            slots: slots.into_boxed_slice(),
            mask: (slot_count - 1) as u64,
            search_id: AtomicU32::new(1),
        }
    }

    #[inline(always)]
    fn current_id(&self) -> u64 {
        self.search_id.load(Ordering::Relaxed) as u64 & ID_BITS
    }

    /// Bumps the 9-bit search id; called once per top-level search so
    /// entry ages stay comparable across iterations.
    pub fn update_id(&self) {
        let next = (self.search_id.load(Ordering::Relaxed) + 1) & ID_BITS as u32;
        self.search_id.store(next.max(1), Ordering::Relaxed);
    }

    pub fn probe(
        &self,
        hash: u64,
        depth: i32,
        null_depth: i32,
        ply: usize,
        alpha: i32,
        beta: i32,
    ) -> TtProbe {
        let slot = &self.slots[(hash & self.mask) as usize];
        for bucket in slot {
            let key = bucket.key.load(Ordering::Relaxed);
            let data = bucket.data.load(Ordering::Relaxed);
            if key ^ data != hash || data == 0 {
                continue;
            }

            // refresh the age so useful entries survive replacement
            let id = self.current_id();
            if unpack_id(data) != id {
                let stamped = (data & !(ID_BITS << ID_SHIFT)) | (id << ID_SHIFT);
                bucket.key.store(hash ^ stamped, Ordering::Relaxed);
                bucket.data.store(stamped, Ordering::Relaxed);
            }

            let entry_depth = unpack_depth(data);
            let bound = unpack_bound(data);
            let mv = unpack_move(data);
            let score = score_from_tt(unpack_value(data), ply);

            let result = if entry_depth >= depth {
                match bound {
                    BOUND_EXACT => Probe::CutoffFound,
                    BOUND_LOWER => {
                        if score >= beta {
                            Probe::CutoffFound
                        } else {
                            Probe::BetaFound
                        }
                    }
                    BOUND_UPPER => {
                        if score <= alpha {
                            Probe::CutoffFound
                        } else if entry_depth >= null_depth && score < beta {
                            Probe::AvoidNull
                        } else {
                            Probe::AlphaFound
                        }
                    }
                    _ => Probe::OrderingOnly,
                }
            } else if bound == BOUND_UPPER && entry_depth >= null_depth && score < beta {
                Probe::AvoidNull
            } else if bound == BOUND_EXACT {
                Probe::ExactFound
            } else {
                Probe::OrderingOnly
            };

            return TtProbe { mv, result, score, depth: entry_depth, bound };
        }
        TtProbe::no_match()
    }

    /// Hash move only, for internal iterative deepening pickup.
    pub fn probe_move(&self, hash: u64) -> Move {
        let slot = &self.slots[(hash & self.mask) as usize];
        for bucket in slot {
            let key = bucket.key.load(Ordering::Relaxed);
            let data = bucket.data.load(Ordering::Relaxed);
            if key ^ data == hash && data != 0 {
                return unpack_move(data);
            }
        }
        NO_MOVE
    }

    pub fn store(&self, hash: u64, mv: Move, depth: i32, bound: u8, value: i32, ply: usize) {
        let id = self.current_id();
        let data = pack(mv, depth, bound, score_to_tt(value, ply), id);
        let slot = &self.slots[(hash & self.mask) as usize];

        // same position: overwrite in place
        for bucket in slot {
            let key = bucket.key.load(Ordering::Relaxed);
            let old = bucket.data.load(Ordering::Relaxed);
            if old == 0 || key ^ old == hash {
                bucket.key.store(hash ^ data, Ordering::Relaxed);
                bucket.data.store(data, Ordering::Relaxed);
                return;
            }
        }

        // stale entries first, shallowest of them
        let mut victim: Option<usize> = None;
        let mut victim_depth = i32::MAX;
        for (i, bucket) in slot.iter().enumerate() {
            let old = bucket.data.load(Ordering::Relaxed);
            if unpack_id(old) != id && unpack_depth(old) < victim_depth {
                victim = Some(i);
                victim_depth = unpack_depth(old);
            }
        }

        // fallback: globally shallowest
        let index = victim.unwrap_or_else(|| {
            let mut index = 0;
            let mut depth_min = i32::MAX;
            for (i, bucket) in slot.iter().enumerate() {
                let old = bucket.data.load(Ordering::Relaxed);
                if unpack_depth(old) < depth_min {
                    depth_min = unpack_depth(old);
                    index = i;
                }
            }
            index
        });

        let bucket = &slot[index];
        bucket.key.store(hash ^ data, Ordering::Relaxed);
        bucket.data.store(data, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            for bucket in slot {
                bucket.key.store(0, Ordering::Relaxed);
                bucket.data.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::position::Piece;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn test_move() -> Move {
        Move::new(12, 28, Piece::Pawn, Piece::Empty, Piece::Empty)
    }

    #[test]
    fn test_pack_roundtrip() {
        let mv = test_move();
        let data = pack(mv, 17, BOUND_EXACT, -1234, 42);
        assert_eq!(unpack_depth(data), 17);
        assert_eq!(unpack_move(data), mv);
        assert_eq!(unpack_bound(data), BOUND_EXACT);
        assert_eq!(unpack_value(data), -1234);
        assert_eq!(unpack_id(data), 42);
    }

    #[test]
    fn test_store_probe() {
        let tt = TranspositionTable::new(1024);
        let hash = 0x1234_5678_9ABC_DEF0;
        tt.store(hash, test_move(), 8, BOUND_EXACT, 150, 0);

        let probe = tt.probe(hash, 8, 5, 0, -INF, INF);
        assert_eq!(probe.result, Probe::CutoffFound);
        assert_eq!(probe.score, 150);
        assert_eq!(probe.mv, test_move());
    }

    #[test]
    fn test_shallow_entry_orders_only() {
        let tt = TranspositionTable::new(1024);
        let hash = 0xDEAD_BEEF_0000_0001;
        tt.store(hash, test_move(), 3, BOUND_LOWER, 75, 0);
        let probe = tt.probe(hash, 8, 5, 0, -100, 100);
        assert_eq!(probe.result, Probe::OrderingOnly);
        assert_eq!(probe.mv, test_move());
    }

    #[test]
    fn test_avoid_null() {
        let tt = TranspositionTable::new(1024);
        let hash = 0xDEAD_BEEF_0000_0002;
        // upper bound well below beta, deep enough for the null window
        tt.store(hash, NO_MOVE, 6, BOUND_UPPER, -50, 0);
        let probe = tt.probe(hash, 9, 6, 0, -300, 300);
        assert_eq!(probe.result, Probe::AvoidNull);
    }

    #[test]
    fn test_lower_bound_cutoff() {
        let tt = TranspositionTable::new(1024);
        let hash = 0xDEAD_BEEF_0000_0003;
        tt.store(hash, test_move(), 10, BOUND_LOWER, 500, 0);
        let probe = tt.probe(hash, 8, 5, 0, 100, 400);
        assert_eq!(probe.result, Probe::CutoffFound);
        let probe = tt.probe(hash, 8, 5, 0, 100, 600);
        assert_eq!(probe.result, Probe::BetaFound);
    }

    #[test]
    fn test_mate_score_ply_adjustment() {
        let tt = TranspositionTable::new(1024);
        let hash = 0xDEAD_BEEF_0000_0004;
        // mate found 5 plies below a node at ply 3
        tt.store(hash, test_move(), 12, BOUND_EXACT, MATE - 8, 3);
        let probe = tt.probe(hash, 10, 7, 6, -INF, INF);
        assert_eq!(probe.score, MATE - 11);
    }

    #[test]
    fn test_replacement_prefers_stale() {
        let tt = TranspositionTable::new(1);
        // fill the single slot's four buckets in one generation
        for i in 0..4u64 {
            tt.store(i << 1, test_move(), 10 + i as i32, BOUND_EXACT, 0, 0);
        }
        tt.update_id();
        // a new store must evict the shallowest stale entry, not a deep one
        tt.store(0x100, test_move(), 2, BOUND_EXACT, 0, 0);
        assert_eq!(tt.probe_move(0x100), test_move());
        let deep = tt.probe(3 << 1, 1, 1, 0, -INF, INF);
        assert_ne!(deep.result, Probe::NoMatch);
    }

    #[test]
    fn test_torn_write_rejected() {
        let tt = Arc::new(TranspositionTable::new(1));
        let stop = Arc::new(AtomicBool::new(false));

        let writer_tt = Arc::clone(&tt);
        let writer_stop = Arc::clone(&stop);
        let writer = std::thread::spawn(move || {
            let mut i: u64 = 0;
            while !writer_stop.load(Ordering::Relaxed) {
                writer_tt.store(i, test_move(), (i % 31) as i32, BOUND_EXACT, (i % 100) as i32, 0);
                i = i.wrapping_add(0x9E37_79B9);
            }
        });

        let mut probes = 0u64;
        let mut hits = 0u64;
        while probes < 2_000_000 {
            let hash = probes.wrapping_mul(0x9E37_79B9);
            let probe = tt.probe(hash, 0, 0, 0, -INF, INF);
            if probe.result != Probe::NoMatch {
                hits += 1;
                // a hit must decode to the exact values some writer stored
                assert_eq!(probe.mv, test_move());
                assert!(probe.score >= 0 && probe.score < 100);
            }
            probes += 1;
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
        assert!(hits > 0, "stress test never hit; key scheme broken?");
    }
}
