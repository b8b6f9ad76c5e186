use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::board::position::{Board, Color, Move, NO_MOVE};
use crate::movegen::generate::perft;
use crate::search::engine::{Engine, SearchLimits, SearchParams};
use crate::search::search::MAX_DEPTH;
use crate::search::timer::GameTimer;

const ENGINE_NAME: &str = "Ferrum";
const ENGINE_VERSION: &str = "0.1";
const ENGINE_AUTHOR: &str = "the Ferrum authors";

const DEFAULT_TT_MB: usize = 64;
const MIN_TT_MB: usize = 1;
const MAX_TT_MB: usize = 4096;
const DEFAULT_THREADS: usize = 1;
const MAX_THREADS: usize = 32;

pub struct UciEngine {
    engine: Arc<Engine>,
    board: Board,
    reps: Vec<u64>,
    threads: usize,
    tt_mb: usize,
    draw_value: i32,
    search_thread: Option<JoinHandle<()>>,
}

impl UciEngine {
    pub fn new() -> Self {
        UciEngine {
            engine: Arc::new(Engine::new(DEFAULT_THREADS, DEFAULT_TT_MB)),
            board: Board::startpos(),
            reps: Vec::new(),
            threads: DEFAULT_THREADS,
            tt_mb: DEFAULT_TT_MB,
            draw_value: SearchParams::default().draw_value,
            search_thread: None,
        }
    }

    pub fn run(&mut self) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(command) = line else { break };
            let trimmed = command.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !self.handle_command(trimmed) {
                break;
            }
            let _ = io::stdout().flush();
        }
        self.stop_search();
    }

    fn handle_command(&mut self, command: &str) -> bool {
        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts[0] {
            "uci" => self.cmd_uci(),
            "isready" => {
                self.stop_search();
                println!("readyok");
            }
            "setoption" => self.cmd_setoption(&parts),
            "ucinewgame" => {
                self.stop_search();
                self.engine.new_game();
                self.board = Board::startpos();
                self.reps.clear();
            }
            "position" => self.cmd_position(&parts),
            "go" => self.cmd_go(&parts),
            "stop" => self.stop_search(),
            "ponderhit" => {
                // minimal ponder hook: commit to the move we were
                // pondering on rather than keep the search open-ended
                self.engine.abort_search();
            }
            "quit" => return false,
            "perft" => self.cmd_perft(&parts),
            "d" | "display" => println!("{}", self.board),
            other => log::warn!("ignoring unknown command: {}", other),
        }
        true
    }

    fn cmd_uci(&self) {
        println!("id name {} {}", ENGINE_NAME, ENGINE_VERSION);
        println!("id author {}", ENGINE_AUTHOR);
        println!(
            "option name Hash type spin default {} min {} max {}",
            DEFAULT_TT_MB, MIN_TT_MB, MAX_TT_MB
        );
        println!(
            "option name Threads type spin default {} min 1 max {}",
            DEFAULT_THREADS, MAX_THREADS
        );
        println!("option name DrawValue type spin default 0 min -100 max 0");
        println!("option name Clear Hash type button");
        println!("uciok");
    }

    fn cmd_setoption(&mut self, parts: &[&str]) {
        self.stop_search();

        let mut name = Vec::new();
        let mut value = Vec::new();
        let mut target: Option<&mut Vec<&str>> = None;
        for &part in &parts[1..] {
            match part {
                "name" => target = Some(&mut name),
                "value" => target = Some(&mut value),
                _ => {
                    if let Some(list) = target.as_mut() {
                        list.push(part);
                    }
                }
            }
        }
        let name = name.join(" ");
        let value = value.join(" ");

        match name.as_str() {
            "Hash" => {
                if let Ok(mb) = value.parse::<usize>() {
                    self.tt_mb = mb.clamp(MIN_TT_MB, MAX_TT_MB);
                    self.rebuild_engine();
                }
            }
            "Threads" => {
                if let Ok(threads) = value.parse::<usize>() {
                    self.threads = threads.clamp(1, MAX_THREADS);
                    self.rebuild_engine();
                }
            }
            "DrawValue" => {
                if let Ok(dv) = value.parse::<i32>() {
                    self.draw_value = dv.clamp(-100, 0);
                    self.engine.set_params(SearchParams {
                        draw_value: self.draw_value,
                        ..SearchParams::default()
                    });
                }
            }
            "Clear Hash" => self.engine.new_game(),
            other => log::warn!("ignoring unknown option: {}", other),
        }
    }

    fn rebuild_engine(&mut self) {
        self.engine = Arc::new(Engine::new(self.threads, self.tt_mb));
        self.engine.set_params(SearchParams {
            draw_value: self.draw_value,
            ..SearchParams::default()
        });
    }

    fn cmd_position(&mut self, parts: &[&str]) {
        self.stop_search();

        let mut index = 1;
        let board = match parts.get(index) {
            Some(&"startpos") => {
                index += 1;
                Some(Board::startpos())
            }
            Some(&"fen") => {
                let fen_end = parts[index + 1..]
                    .iter()
                    .position(|&p| p == "moves")
                    .map(|p| index + 1 + p)
                    .unwrap_or(parts.len());
                let fen = parts[index + 1..fen_end].join(" ");
                index = fen_end;
                Board::from_fen(&fen)
            }
            _ => None,
        };

        let Some(mut board) = board else {
            log::warn!("malformed position command");
            return;
        };

        let mut reps = vec![board.hash_key];
        if parts.get(index) == Some(&"moves") {
            for text in &parts[index + 1..] {
                let Some(m) = board.parse_uci_move(text) else {
                    log::warn!("illegal move in position command: {}", text);
                    break;
                };
                if !board.valid_move(m, board.in_check()) || !board.legal_move(m, board.in_check())
                {
                    log::warn!("illegal move in position command: {}", text);
                    break;
                }
                board.make_move(m);
                reps.push(board.hash_key);
            }
        }
        reps.pop(); // the current position is not a prior occurrence

        self.board = board;
        self.reps = reps;
    }

    fn cmd_go(&mut self, parts: &[&str]) {
        self.stop_search();

        let mut depth: i32 = MAX_DEPTH;
        let mut movetime: Option<u64> = None;
        let mut wtime: Option<u64> = None;
        let mut btime: Option<u64> = None;
        let mut winc: u64 = 0;
        let mut binc: u64 = 0;
        let mut movestogo: Option<u32> = None;
        let mut infinite = false;
        let mut ponder = false;
        let mut searchmoves: Option<Vec<Move>> = None;

        let mut i = 1;
        while i < parts.len() {
            match parts[i] {
                "depth" => {
                    if let Some(v) = parts.get(i + 1).and_then(|p| p.parse().ok()) {
                        depth = v;
                    }
                    i += 2;
                }
                "movetime" => {
                    movetime = parts.get(i + 1).and_then(|p| p.parse().ok());
                    i += 2;
                }
                "wtime" => {
                    wtime = parts.get(i + 1).and_then(|p| p.parse().ok());
                    i += 2;
                }
                "btime" => {
                    btime = parts.get(i + 1).and_then(|p| p.parse().ok());
                    i += 2;
                }
                "winc" => {
                    winc = parts.get(i + 1).and_then(|p| p.parse().ok()).unwrap_or(0);
                    i += 2;
                }
                "binc" => {
                    binc = parts.get(i + 1).and_then(|p| p.parse().ok()).unwrap_or(0);
                    i += 2;
                }
                "movestogo" => {
                    movestogo = parts.get(i + 1).and_then(|p| p.parse().ok());
                    i += 2;
                }
                "nodes" | "mate" => i += 2,
                "infinite" => {
                    infinite = true;
                    i += 1;
                }
                "ponder" => {
                    ponder = true;
                    i += 1;
                }
                "searchmoves" => {
                    let mut moves = Vec::new();
                    let mut j = i + 1;
                    while j < parts.len() {
                        match self.board.parse_uci_move(parts[j]) {
                            Some(m) => moves.push(m),
                            None => break,
                        }
                        j += 1;
                    }
                    i = j;
                    searchmoves = Some(moves);
                }
                _ => i += 1,
            }
        }

        let timer = if infinite || ponder {
            GameTimer::infinite()
        } else if let Some(ms) = movetime {
            GameTimer::move_time(ms)
        } else {
            let (my_time, my_inc) = match self.board.side_to_move {
                Color::White => (wtime, winc),
                Color::Black => (btime, binc),
            };
            match my_time {
                Some(remaining) => {
                    let moves_played = (self.board.fullmove.saturating_sub(1)) as u32;
                    let moves_left =
                        movestogo.unwrap_or_else(|| GameTimer::default_horizon(moves_played));
                    GameTimer::from_clock(remaining, my_inc, moves_left)
                }
                None => GameTimer::infinite(),
            }
        };

        let limits = SearchLimits { depth, timer, searchmoves, verbose: true };
        let engine = Arc::clone(&self.engine);
        let board = self.board.clone();
        let reps = self.reps.clone();

        self.search_thread = Some(
            std::thread::Builder::new()
                .name("ferrum-search".into())
                .spawn(move || {
                    let report = engine.search(&board, reps, &limits);
                    let (best, ponder_move) = if report.best_move != NO_MOVE {
                        (report.best_move, report.ponder_move)
                    } else {
                        engine.published_moves()
                    };
                    if ponder_move != NO_MOVE {
                        println!("bestmove {} ponder {}", best.to_uci(), ponder_move.to_uci());
                    } else {
                        println!("bestmove {}", best.to_uci());
                    }
                    let _ = io::stdout().flush();
                })
                .expect("failed to spawn search thread"),
        );
    }

    fn cmd_perft(&mut self, parts: &[&str]) {
        let depth: u32 = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(4);
        let mut board = self.board.clone();
        let start = Instant::now();
        let nodes = perft(&mut board, depth);
        let elapsed = start.elapsed();
        let nps = (nodes as f64 / elapsed.as_secs_f64()) as u64;
        println!("perft {} nodes {} time {} nps {}", depth, nodes, elapsed.as_millis(), nps);
    }

    fn stop_search(&mut self) {
        if let Some(handle) = self.search_thread.take() {
            self.engine.abort_search();
            let _ = handle.join();
        }
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn run_uci() {
    let mut engine = UciEngine::new();
    engine.run();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_position(uci: &mut UciEngine, command: &str) {
        let parts: Vec<&str> = command.split_whitespace().collect();
        uci.cmd_position(&parts);
    }

    #[test]
    fn test_position_startpos_moves() {
        let mut uci = UciEngine::new();
        apply_position(&mut uci, "position startpos moves e2e4 e7e5");
        assert_eq!(uci.board.side_to_move, Color::White);
        assert_eq!(uci.reps.len(), 2);
        assert_eq!(
            uci.board.to_fen(),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2"
        );
    }

    #[test]
    fn test_position_fen() {
        let mut uci = UciEngine::new();
        let fen = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1";
        apply_position(&mut uci, &format!("position fen {}", fen));
        assert_eq!(uci.board.to_fen(), fen);
        assert!(uci.reps.is_empty());
    }

    #[test]
    fn test_position_rejects_illegal_move() {
        let mut uci = UciEngine::new();
        apply_position(&mut uci, "position startpos moves e2e5");
        // the bogus move is dropped, the position stays at the last
        // legal state
        assert_eq!(uci.board.to_fen(), Board::startpos().to_fen());
    }

    #[test]
    fn test_stop_without_search_is_noop() {
        let mut uci = UciEngine::new();
        uci.stop_search();
    }
}
