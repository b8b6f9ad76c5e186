use std::sync::Arc;

use crate::board::position::{Board, Move, NO_MOVE};
use crate::movegen::generate::{
    get_captures, get_checks, get_evasions, get_noncaptures, MoveList,
};
use crate::search::history::HistoryTable;

/// Move-list pool. Search nodes churn through short-lived vectors at a
/// brutal rate; reusing their allocations keeps the hot path off the
/// allocator.
pub struct Recycler {
    pool: Vec<MoveList>,
}

impl Recycler {
    pub fn new() -> Self {
        Recycler { pool: Vec::with_capacity(64) }
    }

    #[inline(always)]
    pub fn attempt_reuse(&mut self) -> MoveList {
        match self.pool.pop() {
            Some(list) => list,
            None => MoveList::with_capacity(32),
        }
    }

    #[inline(always)]
    pub fn recycle(&mut self, mut list: MoveList) {
        list.clear();
        if self.pool.len() < 256 {
            self.pool.push(list);
        }
    }
}

impl Default for Recycler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Hash,
    WinningCapture,
    Killer,
    LosingCapture,
    Remaining,
}

const STAGE_ORDER: [Stage; 5] = [
    Stage::Hash,
    Stage::WinningCapture,
    Stage::Killer,
    Stage::LosingCapture,
    Stage::Remaining,
];

/// Lazy staged move source for the main search. Owns a snapshot of the
/// board so a split point can share one selector between workers behind
/// a mutex; generation for a stage is deferred until the stage is
/// actually reached.
pub struct MoveSelector {
    board: Board,
    htable: Arc<HistoryTable>,
    killers: [Move; 2],
    first_move: Move,
    in_check: bool,
    stage: usize,
    index: usize,
    winning: MoveList,
    losing: MoveList,
    remaining: MoveList,
}

impl MoveSelector {
    pub fn new(
        board: &Board,
        htable: Arc<HistoryTable>,
        killers: [Move; 2],
        in_check: bool,
        first_move: Move,
    ) -> Self {
        MoveSelector {
            board: board.clone(),
            htable,
            killers,
            first_move,
            in_check,
            stage: 0,
            index: 0,
            winning: MoveList::new(),
            losing: MoveList::new(),
            remaining: MoveList::new(),
        }
    }

    /// Next candidate and the stage it came from, or None when the node
    /// is out of moves. Yielded moves are legal.
    pub fn next(&mut self, recycler: &mut Recycler) -> Option<(Move, Stage)> {
        loop {
            let stage = *STAGE_ORDER.get(self.stage)?;
            match stage {
                Stage::Hash => {
                    self.stage += 1;
                    let m = self.first_move;
                    if m != NO_MOVE
                        && self.board.valid_move(m, self.in_check)
                        && self.board.legal_move(m, self.in_check)
                    {
                        return Some((m, Stage::Hash));
                    }
                }
                Stage::WinningCapture => {
                    if self.index == 0 && self.winning.is_empty() && self.losing.is_empty()
                        && self.remaining.is_empty()
                    {
                        self.generate_tactical(recycler);
                    }
                    match self.yield_from_winning() {
                        Some(m) => return Some((m, Stage::WinningCapture)),
                        None => {
                            self.stage += 1;
                            self.index = 0;
                        }
                    }
                }
                Stage::Killer => {
                    while self.index < 2 {
                        let m = self.killers[self.index];
                        self.index += 1;
                        if m != NO_MOVE
                            && m != self.first_move
                            && m.is_quiet()
                            && self.board.valid_move(m, self.in_check)
                            && self.board.legal_move(m, self.in_check)
                        {
                            return Some((m, Stage::Killer));
                        }
                    }
                    self.stage += 1;
                    self.index = 0;
                    self.losing.sort_unstable_by_key(|sm| sm.score);
                }
                Stage::LosingCapture => match self.yield_from_losing() {
                    Some(m) => return Some((m, Stage::LosingCapture)),
                    None => {
                        self.stage += 1;
                        self.index = 0;
                        if !self.in_check {
                            let mut quiet = recycler.attempt_reuse();
                            get_noncaptures(&self.board, &self.htable, &mut quiet);
                            self.remaining = quiet;
                        }
                        self.remaining.sort_unstable_by_key(|sm| -sm.score);
                    }
                },
                Stage::Remaining => match self.yield_from_remaining() {
                    Some(m) => return Some((m, Stage::Remaining)),
                    None => {
                        self.stage += 1;
                    }
                },
            }
        }
    }

    fn generate_tactical(&mut self, recycler: &mut Recycler) {
        let mut winning = recycler.attempt_reuse();
        let mut losing = recycler.attempt_reuse();
        if self.in_check {
            let mut remaining = recycler.attempt_reuse();
            get_evasions(&self.board, &self.htable, &mut winning, &mut losing, &mut remaining);
            self.remaining = remaining;
        } else {
            get_captures(&self.board, &mut winning, &mut losing);
        }
        winning.sort_unstable_by_key(|sm| -sm.score);
        self.winning = winning;
        self.losing = losing;
    }

    fn yield_from_winning(&mut self) -> Option<Move> {
        while self.index < self.winning.len() {
            let m = self.winning[self.index].mv;
            self.index += 1;
            if m != self.first_move && self.board.avoids_check(m, self.in_check) {
                return Some(m);
            }
        }
        None
    }

    fn yield_from_losing(&mut self) -> Option<Move> {
        while self.index < self.losing.len() {
            let m = self.losing[self.index].mv;
            self.index += 1;
            if m != self.first_move && self.board.avoids_check(m, self.in_check) {
                return Some(m);
            }
        }
        None
    }

    fn yield_from_remaining(&mut self) -> Option<Move> {
        while self.index < self.remaining.len() {
            let m = self.remaining[self.index].mv;
            self.index += 1;
            if m != self.first_move
                && !(m == self.killers[0] || m == self.killers[1])
                && self.board.avoids_check(m, self.in_check)
            {
                return Some(m);
            }
        }
        None
    }

    pub fn recycle_into(&mut self, recycler: &mut Recycler) {
        recycler.recycle(std::mem::take(&mut self.winning));
        recycler.recycle(std::mem::take(&mut self.losing));
        recycler.recycle(std::mem::take(&mut self.remaining));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QStage {
    Winning,
    Losing,
    Remaining,
    Checks,
    Done,
}

/// Quiescence move source: winning then losing captures, the full
/// evasion set when in check, and quiet checks while the check budget
/// lasts.
pub struct QMoveSelector {
    board: Board,
    htable: Arc<HistoryTable>,
    in_check: bool,
    can_check: bool,
    stage: QStage,
    index: usize,
    winning: MoveList,
    losing: MoveList,
    remaining: MoveList,
    checks: MoveList,
}

impl QMoveSelector {
    pub fn new(board: &Board, htable: Arc<HistoryTable>, in_check: bool, can_check: bool) -> Self {
        QMoveSelector {
            board: board.clone(),
            htable,
            in_check,
            can_check,
            stage: QStage::Winning,
            index: 0,
            winning: MoveList::new(),
            losing: MoveList::new(),
            remaining: MoveList::new(),
            checks: MoveList::new(),
        }
    }

    pub fn next(&mut self, recycler: &mut Recycler) -> Option<Move> {
        loop {
            match self.stage {
                QStage::Winning => {
                    if self.index == 0 && self.winning.is_empty() && self.losing.is_empty()
                        && self.remaining.is_empty()
                    {
                        let mut winning = recycler.attempt_reuse();
                        let mut losing = recycler.attempt_reuse();
                        if self.in_check {
                            let mut remaining = recycler.attempt_reuse();
                            get_evasions(
                                &self.board,
                                &self.htable,
                                &mut winning,
                                &mut losing,
                                &mut remaining,
                            );
                            self.remaining = remaining;
                        } else {
                            get_captures(&self.board, &mut winning, &mut losing);
                        }
                        winning.sort_unstable_by_key(|sm| -sm.score);
                        self.winning = winning;
                        self.losing = losing;
                    }
                    if let Some(m) = self.yield_list(true) {
                        return Some(m);
                    }
                    self.stage = QStage::Losing;
                    self.index = 0;
                    self.losing.sort_unstable_by_key(|sm| sm.score);
                }
                QStage::Losing => {
                    if let Some(m) = self.yield_list(false) {
                        return Some(m);
                    }
                    self.stage = QStage::Remaining;
                    self.index = 0;
                }
                QStage::Remaining => {
                    // only populated by the evasion generator
                    while self.index < self.remaining.len() {
                        let m = self.remaining[self.index].mv;
                        self.index += 1;
                        if self.board.avoids_check(m, self.in_check) {
                            return Some(m);
                        }
                    }
                    self.stage = QStage::Checks;
                    self.index = 0;
                    if !self.in_check && self.can_check {
                        let mut checks = recycler.attempt_reuse();
                        get_checks(&self.board, &self.htable, &mut checks);
                        checks.sort_unstable_by_key(|sm| -sm.score);
                        self.checks = checks;
                    }
                }
                QStage::Checks => {
                    while self.index < self.checks.len() {
                        let m = self.checks[self.index].mv;
                        self.index += 1;
                        if self.board.avoids_check(m, self.in_check) {
                            return Some(m);
                        }
                    }
                    self.stage = QStage::Done;
                }
                QStage::Done => return None,
            }
        }
    }

    fn yield_list(&mut self, winning: bool) -> Option<Move> {
        let list = if winning { &self.winning } else { &self.losing };
        while self.index < list.len() {
            let m = list[self.index].mv;
            self.index += 1;
            if self.board.avoids_check(m, self.in_check) {
                return Some(m);
            }
        }
        None
    }

    pub fn recycle_into(&mut self, recycler: &mut Recycler) {
        recycler.recycle(std::mem::take(&mut self.winning));
        recycler.recycle(std::mem::take(&mut self.losing));
        recycler.recycle(std::mem::take(&mut self.remaining));
        recycler.recycle(std::mem::take(&mut self.checks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::generate::generate_legal;

    fn drain(selector: &mut MoveSelector) -> Vec<Move> {
        let mut recycler = Recycler::new();
        let mut moves = Vec::new();
        while let Some((m, _)) = selector.next(&mut recycler) {
            moves.push(m);
        }
        moves
    }

    #[test]
    fn test_selector_yields_all_legal_moves() {
        let board = Board::startpos();
        let htable = Arc::new(HistoryTable::new());
        let mut selector =
            MoveSelector::new(&board, htable, [NO_MOVE; 2], board.in_check(), NO_MOVE);
        let mut yielded = drain(&mut selector);
        let mut expected: Vec<Move> = generate_legal(&board);
        yielded.sort_by_key(|m| m.0);
        expected.sort_by_key(|m| m.0);
        assert_eq!(yielded, expected);
    }

    #[test]
    fn test_selector_no_duplicates_with_hash_and_killers() {
        let board = Board::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        let htable = Arc::new(HistoryTable::new());
        let hash_move = board.parse_uci_move("e2a6").unwrap();
        let killer = board.parse_uci_move("a2a3").unwrap();
        let mut selector = MoveSelector::new(
            &board,
            htable,
            [killer, NO_MOVE],
            board.in_check(),
            hash_move,
        );
        let yielded = drain(&mut selector);

        let mut seen = std::collections::HashSet::new();
        for m in &yielded {
            assert!(seen.insert(m.0), "duplicate move {}", m.to_uci());
        }
        assert_eq!(yielded.len(), generate_legal(&board).len());
        assert_eq!(yielded[0], hash_move);
    }

    #[test]
    fn test_selector_in_check_only_evasions() {
        let board = Board::from_fen("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1").unwrap();
        let htable = Arc::new(HistoryTable::new());
        let mut selector =
            MoveSelector::new(&board, htable, [NO_MOVE; 2], true, NO_MOVE);
        let yielded = drain(&mut selector);
        assert_eq!(yielded.len(), generate_legal(&board).len());
        for m in yielded {
            assert!(board.resolves_check(m));
        }
    }

    #[test]
    fn test_qselector_quiet_position_yields_captures_only() {
        let board = Board::from_fen(
            "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2",
        )
        .unwrap();
        let htable = Arc::new(HistoryTable::new());
        let mut recycler = Recycler::new();
        let mut selector = QMoveSelector::new(&board, htable, false, false);
        while let Some(m) = selector.next(&mut recycler) {
            assert!(m.is_capture() || m.is_promotion());
        }
    }
}
