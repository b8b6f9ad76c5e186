use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::board::position::{Board, Move, BISHOP_VALUE, NO_MOVE, PAWN_VALUE, ROOK_VALUE};
use crate::eval::evaluate::evaluate;
use crate::eval::pawns::PawnTable;
use crate::movegen::attacks::see_move;
use crate::movegen::generate::has_legal_move;
use crate::movegen::selector::{MoveSelector, QMoveSelector, Recycler, Stage};
use crate::search::engine::Shared;
use crate::search::split::{child_node_type, NodeType, SpInner, SplitPoint, StackItem};
use crate::search::timer::GameTimer;
use crate::search::transposition::{Probe, BOUND_EXACT, BOUND_LOWER, BOUND_UPPER};

pub const MAX_PLY: usize = 128;
pub const INF: i32 = 32000;
pub const MATE: i32 = 31000;
/// The TT depth field is five bits wide; deeper nominal searches would
/// alias in the table.
pub const MAX_DEPTH: i32 = 31;

pub const EXT_MAX: i32 = 16;
const F_PRUNE_MAX: i32 = 3;
const LMR_MIN: i32 = 2;
const IID_MIN: i32 = 4;
const SE_MIN: i32 = 8;
const NULL_VERIFY_MIN: i32 = 8;
const MAX_Q_CHECKS: i32 = 2;
const POLL_INTERVAL: u64 = 2048;

#[inline(always)]
pub fn is_mate_score(score: i32) -> bool {
    score.abs() >= MATE - MAX_PLY as i32
}

/// Triangular principal-variation table.
pub struct PvTable {
    table: Box<[[Move; MAX_PLY]; MAX_PLY]>,
    length: [usize; MAX_PLY],
}

impl PvTable {
    pub fn new() -> Self {
        PvTable { table: Box::new([[NO_MOVE; MAX_PLY]; MAX_PLY]), length: [0; MAX_PLY] }
    }

    #[inline(always)]
    pub fn init_ply(&mut self, ply: usize) {
        self.length[ply] = 0;
        if ply + 1 < MAX_PLY {
            self.length[ply + 1] = 0;
        }
    }

    pub fn update(&mut self, ply: usize, mv: Move) {
        self.table[ply][0] = mv;
        let child_len = if ply + 1 < MAX_PLY {
            self.length[ply + 1].min(MAX_PLY - ply - 2)
        } else {
            0
        };
        for i in 0..child_len {
            self.table[ply][i + 1] = self.table[ply + 1][i];
        }
        self.length[ply] = 1 + child_len;
    }

    /// Splices a line assembled elsewhere (a split point) into this ply.
    pub fn install(&mut self, ply: usize, line: &[Move]) {
        let len = line.len().min(MAX_PLY - ply - 1);
        self.table[ply][..len].copy_from_slice(&line[..len]);
        self.length[ply] = len;
    }

    pub fn collect(&self, ply: usize) -> Vec<Move> {
        self.table[ply][..self.length[ply]]
            .iter()
            .copied()
            .take_while(|&m| m != NO_MOVE)
            .collect()
    }

    pub fn best_move(&self) -> Move {
        if self.length[0] > 0 {
            self.table[0][0]
        } else {
            NO_MOVE
        }
    }
}

impl Default for PvTable {
    fn default() -> Self {
        Self::new()
    }
}

struct SplitOutcome {
    best: i32,
    best_move: Move,
    alpha: i32,
    cutoff: bool,
    legal_searched: usize,
    pv: Vec<Move>,
}

/// One worker's view of a search: private stack, PV table, pawn cache
/// and list recycler, plus handles to everything shared.
pub struct SearchContext {
    pub shared: Arc<Shared>,
    pub worker_id: usize,
    pub stack: Vec<StackItem>,
    pub pv: PvTable,
    pub recycler: Recycler,
    pub pawn_table: PawnTable,
    pub current_sp: Option<Arc<SplitPoint>>,
    pub reps: Arc<Vec<u64>>,
    pub root_moves: Option<Vec<Move>>,
    pub timer: Option<Arc<GameTimer>>,
    pub draw_score: i32,
    split_min: i32,
    local_nodes: u64,
    since_poll: u64,
}

impl SearchContext {
    pub fn new(shared: Arc<Shared>, worker_id: usize) -> Self {
        let params = shared.params();
        SearchContext {
            shared,
            worker_id,
            stack: vec![StackItem::new(); MAX_PLY],
            pv: PvTable::new(),
            recycler: Recycler::new(),
            pawn_table: PawnTable::new(),
            current_sp: None,
            reps: Arc::new(Vec::new()),
            root_moves: None,
            timer: None,
            draw_score: params.draw_value,
            split_min: params.split_min,
            local_nodes: 0,
            since_poll: 0,
        }
    }

    pub fn refresh_params(&mut self) {
        let params = self.shared.params();
        self.draw_score = params.draw_value;
        self.split_min = params.split_min;
    }

    #[inline(always)]
    fn draw_value(&self) -> i32 {
        self.draw_score
    }

    #[inline(always)]
    fn cancelled(&self) -> bool {
        if self.shared.aborted() {
            return true;
        }
        match &self.current_sp {
            Some(sp) => sp.is_cancelled(),
            None => false,
        }
    }

    #[inline(always)]
    fn count_node(&mut self) {
        self.local_nodes += 1;
        self.since_poll += 1;
        if self.since_poll >= POLL_INTERVAL {
            self.flush_nodes();
            if let Some(timer) = &self.timer {
                if timer.expired() {
                    self.shared.abort();
                }
            }
        }
    }

    pub fn flush_nodes(&mut self) {
        self.shared.stats.nodes.fetch_add(self.local_nodes, Ordering::Relaxed);
        self.local_nodes = 0;
        self.since_poll = 0;
    }

    fn is_repetition(&self, board: &Board, ply: usize) -> bool {
        let hash = board.hash_key;
        let floor = ply as isize - board.halfmove_clock as isize;
        let mut i = ply as isize - 4;
        while i >= 0 && i >= floor {
            if self.stack[i as usize].hash_key == hash {
                return true;
            }
            i -= 2;
        }
        if floor < 0 {
            for &h in self.reps.iter().rev().take((-floor) as usize) {
                if h == hash {
                    return true;
                }
            }
        }
        false
    }

    fn store_cutoff(&mut self, board: &Board, mv: Move, depth: i32, ply: usize) {
        if !mv.is_capture() {
            self.shared.htable.store(board.side_to_move, mv.from(), mv.to(), depth);
            if !mv.is_promotion() {
                self.stack[ply].update_killers(mv);
            }
        }
    }

    /// The parallel alpha-beta routine: principal variation search with
    /// the pruning battery, publishing a split point once the eldest
    /// brother at a node has been searched sequentially.
    #[allow(clippy::too_many_arguments)]
    pub fn ybw(
        &mut self,
        board: &mut Board,
        mut alpha: i32,
        mut beta: i32,
        mut depth: i32,
        ply: usize,
        can_null: bool,
        can_split: bool,
        mut node_type: NodeType,
        mut extensions_left: i32,
    ) -> i32 {
        if depth <= 0 {
            return self.quiescence(board, alpha, beta, ply, MAX_Q_CHECKS);
        }
        if self.cancelled() {
            return 0;
        }
        self.count_node();
        if ply >= MAX_PLY - 1 {
            return evaluate(board, &mut self.pawn_table, alpha, beta);
        }

        let is_pv = node_type == NodeType::Pv;
        if is_pv {
            self.pv.init_ply(ply);
        }
        self.stack[ply].hash_key = board.hash_key;

        if ply > 0 {
            if self.is_repetition(board, ply) {
                return self.draw_value();
            }
            if board.halfmove_clock >= 100 {
                return if board.in_check() && !has_legal_move(board) {
                    ply as i32 - MATE
                } else {
                    self.draw_value()
                };
            }
            // mate-distance pruning
            alpha = alpha.max(ply as i32 - MATE);
            beta = beta.min(MATE - ply as i32 - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        let in_check = board.in_check();
        self.stack[ply].in_check = in_check;
        if in_check && extensions_left > 0 {
            // the first check in a variation only spends budget; later
            // checks extend
            if extensions_left < EXT_MAX {
                depth += 1;
            }
            extensions_left -= 1;
        }

        let null_depth = if depth > 6 { depth - 3 } else { depth - 2 };
        let excluded = self.stack[ply].singular_move;
        let probe =
            self.shared.tt.probe(board.hash_key, depth, null_depth, ply, alpha, beta);
        let mut first_move = probe.mv;

        if !is_pv && excluded == NO_MOVE && probe.result == Probe::CutoffFound {
            self.shared.stats.tt_cuts.fetch_add(1, Ordering::Relaxed);
            return probe.score;
        }

        let static_eval = if in_check {
            -INF
        } else {
            evaluate(board, &mut self.pawn_table, alpha, beta)
        };
        self.stack[ply].eval = static_eval;

        // null move: hand the opponent a free shot; if the reduced search
        // still clears beta the real position almost certainly does too
        if !is_pv
            && !in_check
            && can_null
            && excluded == NO_MOVE
            && probe.result != Probe::AvoidNull
            && depth > 2
            && board.has_non_pawn_material(board.side_to_move)
            && static_eval >= beta
        {
            let memento = board.make_null();
            let score = -self.ybw(
                board,
                -beta,
                -beta + 1,
                null_depth - 1,
                ply + 1,
                false,
                can_split,
                NodeType::Cut,
                extensions_left,
            );
            board.unmake_null(&memento);
            if self.cancelled() {
                return 0;
            }
            if score >= beta && !is_mate_score(score) {
                let verified = if depth >= NULL_VERIFY_MIN {
                    // zugzwang guard: confirm without the null move
                    let v = self.ybw(
                        board,
                        beta - 1,
                        beta,
                        null_depth - 1,
                        ply,
                        false,
                        can_split,
                        NodeType::Cut,
                        extensions_left,
                    );
                    v >= beta
                } else {
                    true
                };
                if self.cancelled() {
                    return 0;
                }
                if verified {
                    self.shared.stats.null_cuts.fetch_add(1, Ordering::Relaxed);
                    self.shared.tt.store(board.hash_key, NO_MOVE, depth, BOUND_LOWER, score, ply);
                    return score;
                }
            }
        }

        // internal iterative deepening: a PV node with no hash move gets
        // a shallow scout to find one
        if probe.result == Probe::NoMatch
            && can_null
            && depth >= IID_MIN
            && node_type != NodeType::All
            && excluded == NO_MOVE
        {
            self.ybw(board, alpha, beta, depth - 2, ply, can_null, false, node_type, extensions_left);
            if self.cancelled() {
                return 0;
            }
            first_move = self.shared.tt.probe_move(board.hash_key);
        }

        // singular extension: at an expected cut node, check whether the
        // hash move is the only move beating its bound
        let mut singular_extension = 0;
        if node_type == NodeType::Cut
            && depth >= SE_MIN
            && excluded == NO_MOVE
            && first_move != NO_MOVE
            && probe.depth >= depth - 3
            && (probe.bound == BOUND_LOWER || probe.bound == BOUND_EXACT)
            && !is_mate_score(probe.score)
        {
            let target = probe.score - 2 * depth;
            self.stack[ply].singular_move = first_move;
            let score = self.ybw(
                board,
                target - 1,
                target,
                (depth - 1) / 2,
                ply,
                false,
                false,
                NodeType::Cut,
                extensions_left,
            );
            self.stack[ply].singular_move = NO_MOVE;
            if self.cancelled() {
                return 0;
            }
            if score < target {
                singular_extension = 1;
            }
        }

        let old_alpha = alpha;
        let mut best = -INF;
        let mut best_move = NO_MOVE;
        let mut legal_searched = 0usize;

        let killers = self.stack[ply].killers;
        let mut selector = Some(MoveSelector::new(
            board,
            self.shared.htable.clone(),
            killers,
            in_check,
            first_move,
        ));

        let f_prune = !is_pv
            && !in_check
            && ply > 0
            && depth <= F_PRUNE_MAX
            && static_eval != -INF
            && static_eval + BISHOP_VALUE < alpha
            && alpha > 100 - MATE;
        let can_reduce = !in_check && depth >= LMR_MIN;

        loop {
            if self.cancelled() {
                if let Some(mut sel) = selector.take() {
                    sel.recycle_into(&mut self.recycler);
                }
                return 0;
            }
            let Some((m, stage)) = selector.as_mut().unwrap().next(&mut self.recycler) else {
                break;
            };
            if m == excluded {
                continue;
            }
            if ply == 0 {
                if let Some(allowed) = &self.root_moves {
                    if !allowed.contains(&m) {
                        continue;
                    }
                }
            }

            let gives_check = board.gives_check(m);
            let quiet = m.is_quiet();

            if legal_searched > 0 && quiet && !gives_check && !board.is_passed_pawn_move(m) {
                if f_prune {
                    continue;
                }
                // frontier losing quiets are not worth a node either
                if !is_pv && !in_check && depth <= F_PRUNE_MAX && see_move(board, m) < 0 {
                    continue;
                }
            }

            let mut extension = 0;
            let mut child_extensions = extensions_left;
            if m == first_move {
                extension += singular_extension;
            }
            if stage == Stage::WinningCapture && m.is_promotion() && child_extensions > 0 {
                extension += 1;
                child_extensions -= 1;
            }

            let mut reduction = 0;
            if can_reduce
                && (!is_pv || legal_searched > 0)
                && stage == Stage::Remaining
                && quiet
                && !gives_check
                && legal_searched > 0
                && !board.is_passed_pawn_move(m)
            {
                reduction = 1;
            }

            let child_type = child_node_type(node_type, legal_searched);
            if legal_searched > 5 && node_type == NodeType::Cut {
                node_type = NodeType::All;
            }

            let new_depth = depth - 1 + extension;
            let memento = board.make_move(m);
            let mut score;
            if legal_searched == 0 {
                score = -self.ybw(
                    board,
                    -beta,
                    -alpha,
                    new_depth,
                    ply + 1,
                    true,
                    can_split,
                    child_type,
                    child_extensions,
                );
            } else {
                score = -self.ybw(
                    board,
                    -alpha - 1,
                    -alpha,
                    new_depth - reduction,
                    ply + 1,
                    true,
                    can_split,
                    child_type,
                    child_extensions,
                );
                if score > alpha && reduction > 0 {
                    // reduced move looked good: prove it at full depth
                    score = -self.ybw(
                        board,
                        -alpha - 1,
                        -alpha,
                        new_depth,
                        ply + 1,
                        true,
                        can_split,
                        child_type,
                        child_extensions,
                    );
                }
                if score > alpha && score < beta {
                    let research_type = if is_pv { NodeType::Pv } else { child_type };
                    score = -self.ybw(
                        board,
                        -beta,
                        -alpha,
                        new_depth,
                        ply + 1,
                        true,
                        can_split,
                        research_type,
                        child_extensions,
                    );
                }
            }
            board.unmake_move(m, &memento);
            if self.cancelled() {
                if let Some(mut sel) = selector.take() {
                    sel.recycle_into(&mut self.recycler);
                }
                return 0;
            }

            legal_searched += 1;
            if score > best {
                best = score;
                best_move = m;
                if score > alpha {
                    alpha = score;
                    if is_pv {
                        self.pv.update(ply, m);
                    }
                    if score >= beta {
                        self.store_cutoff(board, m, depth, ply);
                        self.shared.tt.store(board.hash_key, m, depth, BOUND_LOWER, score, ply);
                        if let Some(mut sel) = selector.take() {
                            sel.recycle_into(&mut self.recycler);
                        }
                        return score;
                    }
                }
            }

            // Young Brothers Wait: the eldest sibling is done, so the
            // rest of the node may be adopted by idle workers
            if can_split
                && ply > 0
                && depth >= self.split_min
                && excluded == NO_MOVE
                && self.shared.balancer.has_idle()
            {
                let outcome = self.split(
                    board,
                    selector.take().unwrap(),
                    alpha,
                    beta,
                    best,
                    best_move,
                    depth,
                    ply,
                    node_type,
                    in_check,
                    extensions_left,
                    legal_searched,
                );
                if self.shared.aborted() {
                    return 0;
                }
                best = outcome.best;
                best_move = outcome.best_move;
                alpha = outcome.alpha;
                legal_searched = outcome.legal_searched;
                if outcome.cutoff {
                    self.store_cutoff(board, best_move, depth, ply);
                    self.shared.tt.store(board.hash_key, best_move, depth, BOUND_LOWER, best, ply);
                    return best;
                }
                if is_pv && alpha > old_alpha && !outcome.pv.is_empty() {
                    self.pv.install(ply, &outcome.pv);
                }
                break;
            }
        }

        if let Some(mut sel) = selector.take() {
            sel.recycle_into(&mut self.recycler);
        }

        if legal_searched == 0 {
            if excluded != NO_MOVE {
                // everything but the excluded move was unsearchable
                return alpha;
            }
            let score = if in_check { ply as i32 - MATE } else { self.draw_value() };
            self.shared.tt.store(board.hash_key, NO_MOVE, depth, BOUND_EXACT, score, ply);
            return score;
        }

        let bound = if alpha > old_alpha { BOUND_EXACT } else { BOUND_UPPER };
        self.shared.tt.store(board.hash_key, best_move, depth, bound, best, ply);
        best
    }

    /// Tactical-only search past the horizon. Sequential by design:
    /// quiescence trees are deep and narrow, so splitting them costs
    /// more in coordination than it buys in work.
    fn quiescence(
        &mut self,
        board: &mut Board,
        mut alpha: i32,
        beta: i32,
        ply: usize,
        mut checks_remaining: i32,
    ) -> i32 {
        if self.cancelled() {
            return 0;
        }
        self.shared.stats.qnodes.fetch_add(1, Ordering::Relaxed);
        if ply >= MAX_PLY - 1 {
            return evaluate(board, &mut self.pawn_table, alpha, beta);
        }
        self.stack[ply].hash_key = board.hash_key;
        if self.is_repetition(board, ply) {
            return self.draw_value();
        }
        if board.halfmove_clock >= 100 {
            return if board.in_check() && !has_legal_move(board) {
                ply as i32 - MATE
            } else {
                self.draw_value()
            };
        }

        let in_check = board.in_check();
        let mut best = if in_check {
            checks_remaining -= 1;
            -INF
        } else {
            let stand_pat = evaluate(board, &mut self.pawn_table, alpha, beta);
            if stand_pat >= beta {
                return stand_pat;
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
            stand_pat
        };

        let mut selector = QMoveSelector::new(
            board,
            self.shared.htable.clone(),
            in_check,
            checks_remaining > 0,
        );

        let mut any_legal = false;
        while let Some(m) = selector.next(&mut self.recycler) {
            any_legal = true;

            // delta pruning: even winning this piece cleanly cannot
            // bring the score back into the window
            if !in_check && m.is_capture() && alpha > 100 - MATE {
                let mut gain = m.captured().value();
                if m.is_promotion() {
                    gain += m.promoted().value() - PAWN_VALUE;
                }
                if best + gain + ROOK_VALUE < alpha && !board.gives_check(m) {
                    continue;
                }
            }

            let memento = board.make_move(m);
            let score = -self.quiescence(board, -beta, -alpha, ply + 1, checks_remaining);
            board.unmake_move(m, &memento);
            if self.cancelled() {
                selector.recycle_into(&mut self.recycler);
                return 0;
            }

            if score > best {
                best = score;
                if score > alpha {
                    alpha = score;
                    if score >= beta {
                        break;
                    }
                }
            }
        }
        selector.recycle_into(&mut self.recycler);

        if in_check && !any_legal {
            return ply as i32 - MATE;
        }
        best
    }

    /// Publishes the remainder of this node as a split point, serves it
    /// alongside any adopting workers, then gathers the shared result.
    #[allow(clippy::too_many_arguments)]
    fn split(
        &mut self,
        board: &Board,
        selector: MoveSelector,
        alpha: i32,
        beta: i32,
        best: i32,
        best_move: Move,
        depth: i32,
        ply: usize,
        node_type: NodeType,
        in_check: bool,
        extensions_left: i32,
        legal_searched: usize,
    ) -> SplitOutcome {
        let sp = Arc::new(SplitPoint {
            depth,
            ply,
            node_type,
            checked: in_check,
            extensions_left,
            board: board.clone(),
            item: self.stack[ply],
            path: self.stack[..ply].iter().map(|item| item.hash_key).collect(),
            reps: Arc::clone(&self.reps),
            master: self.worker_id,
            parent: self.current_sp.clone(),
            selector: Mutex::new(selector),
            cancel: std::sync::atomic::AtomicBool::new(false),
            moves_exhausted: std::sync::atomic::AtomicBool::new(false),
            inner: Mutex::new(SpInner {
                alpha,
                beta,
                best,
                best_move,
                best_pv: Vec::new(),
                legal_searched,
                node_count: 0,
                servant_mask: 0,
                cutoff: false,
                worker_finished: false,
            }),
            changed: Condvar::new(),
        });

        self.shared.stats.splits.fetch_add(1, Ordering::Relaxed);
        self.shared.balancer.publish(&sp);

        self.serve_split(&sp);
        self.master_wait(&sp);

        let mut inner = sp.inner.lock().unwrap();
        SplitOutcome {
            best: inner.best,
            best_move: inner.best_move,
            alpha: inner.alpha,
            cutoff: inner.cutoff,
            legal_searched: inner.legal_searched,
            pv: std::mem::take(&mut inner.best_pv),
        }
    }

    /// Pulls moves from a split point's shared selector and searches
    /// them against the shared window. Both the master and its servants
    /// run exactly this loop.
    pub fn serve_split(&mut self, sp: &Arc<SplitPoint>) {
        let previous_sp = self.current_sp.replace(Arc::clone(sp));
        let mut board = sp.board.clone();
        self.stack[sp.ply] = sp.item;

        // adopt the master's path so repetition scans below this node
        // agree with the sequential search; restored on the way out
        let saved_path: Vec<u64> =
            self.stack[..sp.ply].iter().map(|item| item.hash_key).collect();
        for (item, &hash) in self.stack.iter_mut().zip(sp.path.iter()) {
            item.hash_key = hash;
        }

        let is_pv = sp.node_type == NodeType::Pv;

        loop {
            if self.shared.aborted() || sp.is_cancelled() {
                break;
            }

            let next = sp.selector.lock().unwrap().next(&mut self.recycler);
            let Some((m, stage)) = next else {
                sp.moves_exhausted.store(true, Ordering::Relaxed);
                break;
            };

            let (alpha, beta, legal_so_far) = {
                let inner = sp.inner.lock().unwrap();
                if inner.cutoff {
                    break;
                }
                (inner.alpha, inner.beta, inner.legal_searched)
            };
            if alpha >= beta {
                break;
            }

            let gives_check = board.gives_check(m);
            let quiet = m.is_quiet();
            let static_eval = sp.item.eval;

            if quiet && !gives_check && !board.is_passed_pawn_move(m) && !is_pv && !sp.checked {
                let f_prune = sp.depth <= F_PRUNE_MAX
                    && static_eval != -INF
                    && static_eval + BISHOP_VALUE < alpha
                    && alpha > 100 - MATE;
                if f_prune {
                    continue;
                }
                if sp.depth <= F_PRUNE_MAX && see_move(&board, m) < 0 {
                    continue;
                }
            }

            let mut reduction = 0;
            if !sp.checked
                && sp.depth >= LMR_MIN
                && stage == Stage::Remaining
                && quiet
                && !gives_check
                && !board.is_passed_pawn_move(m)
            {
                reduction = 1;
            }

            let child_type = child_node_type(sp.node_type, legal_so_far.max(1));
            let new_depth = sp.depth - 1;

            let memento = board.make_move(m);
            let mut score = -self.ybw(
                &mut board,
                -alpha - 1,
                -alpha,
                new_depth - reduction,
                sp.ply + 1,
                true,
                true,
                child_type,
                sp.extensions_left,
            );
            if score > alpha && reduction > 0 && !sp.is_cancelled() {
                score = -self.ybw(
                    &mut board,
                    -alpha - 1,
                    -alpha,
                    new_depth,
                    sp.ply + 1,
                    true,
                    true,
                    child_type,
                    sp.extensions_left,
                );
            }
            if score > alpha && score < beta && !sp.is_cancelled() {
                let research_type = if is_pv { NodeType::Pv } else { child_type };
                score = -self.ybw(
                    &mut board,
                    -beta,
                    -alpha,
                    new_depth,
                    sp.ply + 1,
                    true,
                    true,
                    research_type,
                    sp.extensions_left,
                );
            }
            board.unmake_move(m, &memento);
            if self.shared.aborted() || sp.is_cancelled() {
                break;
            }

            let mut inner = sp.inner.lock().unwrap();
            inner.legal_searched += 1;
            inner.node_count += 1;
            if score > inner.best {
                inner.best = score;
                inner.best_move = m;
                if is_pv && score > inner.alpha {
                    self.pv.update(sp.ply, m);
                    inner.best_pv = self.pv.collect(sp.ply);
                }
                if score > inner.alpha {
                    inner.alpha = score;
                    if score >= inner.beta {
                        inner.cutoff = true;
                        drop(inner);
                        // the cut propagates down the split tree through
                        // the cancellation chain
                        sp.cancel.store(true, Ordering::Relaxed);
                        self.store_cutoff(&board, m, sp.depth, sp.ply);
                        break;
                    }
                }
            }
        }

        for (item, hash) in self.stack.iter_mut().zip(saved_path) {
            item.hash_key = hash;
        }
        self.current_sp = previous_sp;
    }

    /// Helpful master: when the split point still has servants working,
    /// adopt one of their descendant split points rather than blocking.
    /// Finishing is flagged under the same lock that observes the empty
    /// servant mask, so no late joiner can slip in after we leave.
    fn master_wait(&mut self, sp: &Arc<SplitPoint>) {
        loop {
            if !self.shared.aborted() {
                if let Some(child) = self.shared.balancer.find_helpable(sp, self.worker_id) {
                    if child.try_join(self.worker_id) {
                        self.shared.stats.split_joins.fetch_add(1, Ordering::Relaxed);
                        self.serve_split(&child);
                        child.leave(self.worker_id);
                    }
                    continue;
                }
            }
            let mut inner = sp.inner.lock().unwrap();
            if inner.servant_mask == 0 {
                inner.worker_finished = true;
                return;
            }
            let (mut inner, _) = sp
                .changed
                .wait_timeout(inner, Duration::from_millis(1))
                .unwrap();
            if inner.servant_mask == 0 {
                inner.worker_finished = true;
                return;
            }
        }
    }
}
