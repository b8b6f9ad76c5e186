use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::board::position::{Board, Move, NO_MOVE};
use crate::movegen::selector::MoveSelector;
use crate::search::search::INF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Pv,
    Cut,
    All,
}

/// Onno Garms' node classification: the first child of a PV node is PV,
/// the first child of a CUT node is ALL, everything else alternates.
#[inline(always)]
pub fn child_node_type(parent: NodeType, legal_searched: usize) -> NodeType {
    match parent {
        NodeType::Pv => {
            if legal_searched == 0 {
                NodeType::Pv
            } else {
                NodeType::Cut
            }
        }
        NodeType::Cut => {
            if legal_searched == 0 {
                NodeType::All
            } else {
                NodeType::Cut
            }
        }
        NodeType::All => NodeType::Cut,
    }
}

/// Per-ply scratch owned by one worker; never shared.
#[derive(Debug, Clone, Copy)]
pub struct StackItem {
    pub hash_key: u64,
    pub eval: i32,
    pub killers: [Move; 2],
    pub in_check: bool,
    pub can_null: bool,
    pub singular_move: Move,
}

impl StackItem {
    pub const fn new() -> Self {
        StackItem {
            hash_key: 0,
            eval: -INF,
            killers: [NO_MOVE; 2],
            in_check: false,
            can_null: true,
            singular_move: NO_MOVE,
        }
    }

    #[inline(always)]
    pub fn update_killers(&mut self, mv: Move) {
        if self.killers[0] != mv {
            self.killers[1] = self.killers[0];
            self.killers[0] = mv;
        }
    }

    #[inline(always)]
    pub fn is_killer(&self, mv: Move) -> bool {
        mv == self.killers[0] || mv == self.killers[1]
    }
}

impl Default for StackItem {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared, mutex-guarded half of a split point.
pub struct SpInner {
    pub alpha: i32,
    pub beta: i32,
    pub best: i32,
    pub best_move: Move,
    pub best_pv: Vec<Move>,
    pub legal_searched: usize,
    pub node_count: u64,
    pub servant_mask: u64,
    pub cutoff: bool,
    pub worker_finished: bool,
}

/// A node whose remaining sibling moves are open for adoption. The
/// immutable snapshot lets any worker reconstruct the position; all
/// mutable search state lives behind one mutex, and `cancel` is the only
/// field ever touched without it.
pub struct SplitPoint {
    pub depth: i32,
    pub ply: usize,
    pub node_type: NodeType,
    pub checked: bool,
    pub extensions_left: i32,
    pub board: Board,
    pub item: StackItem,
    /// Hash keys of the master's path from the root to this node, so a
    /// servant's repetition scan sees the same history the master would.
    pub path: Vec<u64>,
    pub reps: Arc<Vec<u64>>,
    pub master: usize,
    pub parent: Option<Arc<SplitPoint>>,
    pub selector: Mutex<MoveSelector>,
    pub cancel: AtomicBool,
    pub moves_exhausted: AtomicBool,
    pub inner: Mutex<SpInner>,
    pub changed: Condvar,
}

impl SplitPoint {
    /// True when this split point or any split point above it has been
    /// cancelled; servants poll this between moves, which is how a beta
    /// cutoff reaches every worker below it.
    pub fn is_cancelled(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        let mut parent = self.parent.as_ref();
        while let Some(sp) = parent {
            if sp.cancel.load(Ordering::Relaxed) {
                return true;
            }
            parent = sp.parent.as_ref();
        }
        false
    }

    /// True when `ancestor` appears in this split point's parent chain
    /// (or is this split point itself); the helpful-master rule only
    /// allows a master to adopt work below its own split point.
    pub fn descends_from(self: &Arc<Self>, ancestor: &Arc<SplitPoint>) -> bool {
        if Arc::ptr_eq(self, ancestor) {
            return true;
        }
        let mut parent = self.parent.as_ref();
        while let Some(sp) = parent {
            if Arc::ptr_eq(sp, ancestor) {
                return true;
            }
            parent = sp.parent.as_ref();
        }
        false
    }

    /// A worker volunteers: claims a servant bit unless the split point
    /// is already finished or cut off.
    pub fn try_join(&self, worker_id: usize) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.cutoff || inner.worker_finished || self.cancel.load(Ordering::Relaxed) {
            return false;
        }
        if inner.servant_mask & (1u64 << worker_id) != 0 {
            return false;
        }
        inner.servant_mask |= 1u64 << worker_id;
        true
    }

    pub fn leave(&self, worker_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.servant_mask &= !(1u64 << worker_id);
        if inner.servant_mask == 0 {
            self.changed.notify_all();
        }
    }

    pub fn has_servants(&self) -> bool {
        self.inner.lock().unwrap().servant_mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_node_type() {
        assert_eq!(child_node_type(NodeType::Pv, 0), NodeType::Pv);
        assert_eq!(child_node_type(NodeType::Pv, 1), NodeType::Cut);
        assert_eq!(child_node_type(NodeType::Cut, 0), NodeType::All);
        assert_eq!(child_node_type(NodeType::Cut, 3), NodeType::Cut);
        assert_eq!(child_node_type(NodeType::All, 0), NodeType::Cut);
    }

    #[test]
    fn test_killers() {
        let mut item = StackItem::new();
        let a = Move(1);
        let b = Move(2);
        item.update_killers(a);
        assert!(item.is_killer(a));
        item.update_killers(b);
        assert!(item.is_killer(a) && item.is_killer(b));
        // storing the same killer twice must not evict the other slot
        item.update_killers(b);
        assert!(item.is_killer(a));
    }
}
