use std::sync::atomic::{AtomicU32, Ordering};

use crate::board::position::Color;

const HISTORY_MAX: u32 = 1 << 20;

/// Shared cutoff counters by (side, from, to). Increments race freely
/// across workers; the counts only order quiet moves, so lost updates
/// cost nothing but a slightly stale sort.
pub struct HistoryTable {
    counters: Box<[[[AtomicU32; 64]; 64]; 2]>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self {
            counters: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| std::array::from_fn(|_| AtomicU32::new(0)))
            })),
        }
    }

    #[inline(always)]
    pub fn get(&self, c: Color, from: u8, to: u8) -> i32 {
        self.counters[c as usize][(from & 63) as usize][(to & 63) as usize]
            .load(Ordering::Relaxed) as i32
    }

    /// Records a beta cutoff caused by a quiet move. Deeper cutoffs count
    /// for more; crossing the saturation bound halves the whole table so
    /// old habits fade.
    pub fn store(&self, c: Color, from: u8, to: u8, depth: i32) {
        let bonus = (depth * depth).max(1) as u32;
        let counter = &self.counters[c as usize][(from & 63) as usize][(to & 63) as usize];
        let updated = counter.fetch_add(bonus, Ordering::Relaxed) + bonus;
        if updated > HISTORY_MAX {
            self.decay();
        }
    }

    fn decay(&self) {
        for side in self.counters.iter() {
            for from in side.iter() {
                for counter in from.iter() {
                    let value = counter.load(Ordering::Relaxed);
                    counter.store(value / 2, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn clear(&self) {
        for side in self.counters.iter() {
            for from in side.iter() {
                for counter in from.iter() {
                    counter.store(0, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let table = HistoryTable::new();
        assert_eq!(table.get(Color::White, 12, 28), 0);
        table.store(Color::White, 12, 28, 5);
        assert_eq!(table.get(Color::White, 12, 28), 25);
        assert_eq!(table.get(Color::Black, 12, 28), 0);
    }

    #[test]
    fn test_decay_on_saturation() {
        let table = HistoryTable::new();
        table.store(Color::White, 0, 1, 4);
        for _ in 0..20 {
            table.store(Color::Black, 8, 16, 300);
        }
        // the big counter triggered at least one halving; the small one
        // shrank with it but stays nonzero ordering-wise
        assert!(table.get(Color::Black, 8, 16) <= HISTORY_MAX as i32);
    }

    #[test]
    fn test_clear() {
        let table = HistoryTable::new();
        table.store(Color::White, 3, 19, 7);
        table.clear();
        assert_eq!(table.get(Color::White, 3, 19), 0);
    }
}
