use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::board::position::{Board, Move, NO_MOVE};
use crate::search::history::HistoryTable;
use crate::search::search::{is_mate_score, SearchContext, EXT_MAX, INF, MATE, MAX_DEPTH};
use crate::search::split::NodeType;
use crate::search::timer::GameTimer;
use crate::search::transposition::{TranspositionTable, DEFAULT_MB};
use crate::search::worker::{spawn_workers, Balancer};

#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Score returned for repetitions and other draws, from the side to
    /// move. Slightly negative values make the engine fight on when the
    /// position is balanced; zero treats every draw as dead equal.
    pub draw_value: i32,
    /// Minimum remaining depth for publishing a split point.
    pub split_min: i32,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams { draw_value: 0, split_min: 5 }
    }
}

#[derive(Default)]
pub struct SearchStats {
    pub nodes: AtomicU64,
    pub qnodes: AtomicU64,
    pub tt_cuts: AtomicU64,
    pub null_cuts: AtomicU64,
    pub splits: AtomicU64,
    pub split_joins: AtomicU64,
}

impl SearchStats {
    pub fn clear(&self) {
        self.nodes.store(0, Ordering::Relaxed);
        self.qnodes.store(0, Ordering::Relaxed);
        self.tt_cuts.store(0, Ordering::Relaxed);
        self.null_cuts.store(0, Ordering::Relaxed);
        self.splits.store(0, Ordering::Relaxed);
        self.split_joins.store(0, Ordering::Relaxed);
    }

    pub fn total_nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed) + self.qnodes.load(Ordering::Relaxed)
    }
}

/// Everything the workers share: the transposition table, the history
/// counters, the load balancer and the abort flag. Owned behind one Arc
/// by the engine and every worker thread.
pub struct Shared {
    pub tt: TranspositionTable,
    pub htable: Arc<HistoryTable>,
    pub stats: SearchStats,
    pub balancer: Balancer,
    abort_flag: AtomicBool,
    generation: AtomicU64,
    params: Mutex<SearchParams>,
}

impl Shared {
    pub fn new(tt_mb: usize, params: SearchParams) -> Self {
        Shared {
            tt: TranspositionTable::new_from_mb(tt_mb),
            htable: Arc::new(HistoryTable::new()),
            stats: SearchStats::default(),
            balancer: Balancer::new(),
            abort_flag: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            params: Mutex::new(params),
        }
    }

    #[inline(always)]
    pub fn aborted(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.abort_flag.store(false, Ordering::SeqCst);
    }

    pub fn params(&self) -> SearchParams {
        *self.params.lock().unwrap()
    }

    pub fn set_params(&self, params: SearchParams) {
        *self.params.lock().unwrap() = params;
    }
}

#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub depth: i32,
    pub timer: GameTimer,
    pub searchmoves: Option<Vec<Move>>,
    pub verbose: bool,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            depth: MAX_DEPTH,
            timer: GameTimer::infinite(),
            searchmoves: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    pub best_move: Move,
    pub ponder_move: Move,
    pub score: i32,
    pub depth: i32,
    pub nodes: u64,
    pub time_ms: u64,
    pub pv: Vec<Move>,
}

#[derive(Default)]
struct Published {
    best_move: Move,
    ponder_move: Move,
}

/// The long-lived engine object: worker pool, shared tables and the
/// iterative-deepening driver. All previously-global search state lives
/// here so two engines can coexist in one process.
pub struct Engine {
    pub shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
    published: Mutex<Published>,
}

impl Engine {
    pub fn new(threads: usize, tt_mb: usize) -> Self {
        let shared = Arc::new(Shared::new(tt_mb.max(1), SearchParams::default()));
        let helper_count = threads.max(1) - 1;
        let workers = spawn_workers(&shared, helper_count);
        Engine { shared, worker_count: helper_count, workers, published: Mutex::new(Published::default()) }
    }

    pub fn with_defaults() -> Self {
        Engine::new(1, DEFAULT_MB)
    }

    pub fn set_params(&self, params: SearchParams) {
        self.shared.set_params(params);
    }

    pub fn new_game(&self) {
        self.shared.tt.clear();
        self.shared.htable.clear();
    }

    pub fn abort_search(&self) {
        self.shared.abort();
    }

    pub fn published_moves(&self) -> (Move, Move) {
        let published = self.published.lock().unwrap();
        (published.best_move, published.ponder_move)
    }

    /// Iterative deepening from depth 1. Only fully completed iterations
    /// update the published move; an expired timer abandons the current
    /// iteration and the previous answer stands.
    pub fn search(&self, board: &Board, reps: Vec<u64>, limits: &SearchLimits) -> SearchReport {
        self.shared.clear_abort();
        self.shared.tt.update_id();
        self.shared.stats.clear();
        *self.published.lock().unwrap() = Published::default();

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = Arc::new(limits.timer.clone());

        if !timer.is_infinite() {
            let shared = Arc::clone(&self.shared);
            let budget = timer.budget();
            std::thread::Builder::new()
                .name("ferrum-timer".into())
                .spawn(move || {
                    std::thread::sleep(budget);
                    if shared.generation.load(Ordering::SeqCst) == generation {
                        shared.abort();
                    }
                })
                .expect("failed to spawn timer thread");
        }

        let mut ctx = SearchContext::new(Arc::clone(&self.shared), 0);
        ctx.refresh_params();
        ctx.reps = Arc::new(reps);
        ctx.timer = Some(Arc::clone(&timer));
        ctx.root_moves = limits.searchmoves.clone();

        let mut root = board.clone();
        let mut report = SearchReport::default();
        let max_depth = limits.depth.clamp(1, MAX_DEPTH);

        for depth in 1..=max_depth {
            let score = ctx.ybw(&mut root, -INF, INF, depth, 0, true, true, NodeType::Pv, EXT_MAX);
            ctx.flush_nodes();

            if self.shared.aborted() && depth > 1 {
                break;
            }

            let pv = ctx.pv.collect(0);
            if pv.is_empty() {
                if !self.shared.aborted() {
                    // no legal move at the root: mated or stalemated
                    report.score = score;
                    report.depth = depth;
                }
                break;
            }

            report = SearchReport {
                best_move: pv[0],
                ponder_move: pv.get(1).copied().unwrap_or(NO_MOVE),
                score,
                depth,
                nodes: self.shared.stats.total_nodes(),
                time_ms: timer.elapsed().as_millis() as u64,
                pv: pv.clone(),
            };
            {
                let mut published = self.published.lock().unwrap();
                published.best_move = report.best_move;
                published.ponder_move = report.ponder_move;
            }

            if limits.verbose {
                print_info(&report);
            }
            if is_mate_score(score) {
                break;
            }
            if self.shared.aborted() || !timer.should_start_iteration() {
                break;
            }
        }

        report.nodes = self.shared.stats.total_nodes();
        report.time_ms = timer.elapsed().as_millis() as u64;
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.abort();
        self.shared.balancer.shutdown(self.worker_count.max(1));
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn print_info(report: &SearchReport) {
    let score = if is_mate_score(report.score) {
        let plies = MATE - report.score.abs();
        let mate_in = (plies + 1) / 2;
        format!("mate {}", if report.score > 0 { mate_in } else { -mate_in })
    } else {
        format!("cp {}", report.score)
    };
    let nps = if report.time_ms > 0 { report.nodes * 1000 / report.time_ms } else { 0 };
    let pv: Vec<String> = report.pv.iter().map(|m| m.to_uci()).collect();
    println!(
        "info depth {} score {} nodes {} nps {} time {} pv {}",
        report.depth,
        score,
        report.nodes,
        nps,
        report.time_ms,
        pv.join(" ")
    );
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_limits(depth: i32) -> SearchLimits {
        SearchLimits { depth, ..Default::default() }
    }

    #[test]
    fn test_finds_back_rank_mate() {
        let engine = Engine::new(1, 8);
        let board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/4R1K1 w - - 0 1").unwrap();
        let report = engine.search(&board, Vec::new(), &depth_limits(4));
        assert_eq!(report.best_move.to_uci(), "e1e8");
        assert_eq!(report.score, MATE - 1);
    }

    #[test]
    fn test_mated_root_reports_mate_score() {
        // fool's mate delivered; black to move has no answer
        let board =
            Board::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        // white is mated: king on e1, queen h4 covers the diagonal
        let engine = Engine::new(1, 8);
        let report = engine.search(&board, Vec::new(), &depth_limits(3));
        assert_eq!(report.best_move, NO_MOVE);
        assert_eq!(report.score, -MATE);
    }

    #[test]
    fn test_queen_endgame_makes_progress() {
        let engine = Engine::new(1, 8);
        let board = Board::from_fen("k7/8/8/8/8/8/5Q2/5K2 w - - 0 1").unwrap();
        let report = engine.search(&board, Vec::new(), &depth_limits(5));
        assert_ne!(report.best_move, NO_MOVE);
        assert!(report.score > 500, "queen-up position scored {}", report.score);
    }

    #[test]
    fn test_shuffle_repetition_is_draw() {
        let engine = Engine::new(1, 8);
        let mut board = Board::startpos();
        let mut reps = vec![board.hash_key];
        for uci in [
            "e2e4", "e7e5", "g1f3", "b8c6", "f3g1", "c6b8", "g1f3", "b8c6", "f3g1", "c6b8",
        ] {
            let m = board.parse_uci_move(uci).unwrap();
            board.make_move(m);
            reps.push(board.hash_key);
        }
        // any further shuffling repeats positions already in the game
        // history, so those lines score as draws inside the tree
        let report = engine.search(&board, reps, &depth_limits(6));
        assert!(report.score.abs() <= 100);
    }

    #[test]
    fn test_searchmoves_restricts_root() {
        let engine = Engine::new(1, 8);
        let board = Board::startpos();
        let only = vec![board.parse_uci_move("a2a3").unwrap()];
        let limits = SearchLimits {
            depth: 3,
            searchmoves: Some(only.clone()),
            ..Default::default()
        };
        let report = engine.search(&board, Vec::new(), &limits);
        assert_eq!(report.best_move, only[0]);
    }

    #[test]
    fn test_single_and_parallel_agree_on_mate_score() {
        // forced mate in two: Ra8+ Rd8, Rxd8#
        let board = Board::from_fen("6k1/3r1ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();

        let serial = Engine::new(1, 8);
        let serial_report = serial.search(&board, Vec::new(), &depth_limits(6));

        let parallel = Engine::new(4, 8);
        let parallel_report = parallel.search(&board, Vec::new(), &depth_limits(6));

        assert_eq!(serial_report.score, parallel_report.score);
        assert_eq!(serial_report.score, MATE - 3);
    }

    #[test]
    fn test_timer_abandons_iteration_gracefully() {
        let engine = Engine::new(1, 8);
        let board = Board::startpos();
        let limits = SearchLimits {
            depth: MAX_DEPTH,
            timer: GameTimer::move_time(120),
            ..Default::default()
        };
        let report = engine.search(&board, Vec::new(), &limits);
        assert_ne!(report.best_move, NO_MOVE);
        assert!(report.time_ms < 5_000);
    }
}
