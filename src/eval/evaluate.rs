use once_cell::sync::Lazy;

use crate::board::bitboard::*;
use crate::board::position::{Board, Color, Piece, BISHOP_VALUE};
use crate::eval::material::{
    in_endgame, lazy_material, pawn_count, BISHOP_PAIR_PAWN_ADJUST, KNIGHT_PAWN_ADJUST,
    ROOK_PAWN_ADJUST,
};
use crate::eval::pawns::{king_shield_mask, PawnTable};
use crate::eval::pst::{king_square, piece_square};
use crate::movegen::magic::{
    bishop_attacks, king_attacks, knight_attacks, queen_attacks, rook_attacks, set_pawn_attacks,
};
use crate::search::search::INF;

const TEMPO_BONUS: i32 = 5;
const BISHOP_PAIR_BASE: i32 = 40;

const KNIGHT_MOBILITY: [i32; 16] = [-6, -3, 0, 1, 2, 3, 4, 5, 8, 0, 0, 0, 0, 0, 0, 0];
const BISHOP_MOBILITY: [i32; 16] = [-8, -4, -2, 0, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
const ROOK_MOBILITY: [i32; 16] = [-3, -2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 8, 8, 8, 8];
const QUEEN_MOBILITY: [i32; 32] = [
    -10, -6, -3, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15, 16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 16,
];

const QUEEN_TROPISM: [i32; 8] = [0, 12, 9, 6, 3, 0, -3, -6];
const PAWN_SHIELD_BONUS: [i32; 4] = [-9, -3, 3, 9];

/// Non-linear payoff for piling attackers onto the enemy king zone: one
/// loose check is noise, a coordinated attack snowballs.
#[rustfmt::skip]
const KING_THREAT_BONUS: [i32; 64] = [
      0,   2,   3,   5,   9,  15,  24,  37,
     55,  79, 111, 150, 195, 244, 293, 337,
    370, 389, 389, 389, 389, 389, 389, 389,
    389, 389, 389, 389, 389, 389, 389, 389,
    389, 389, 389, 389, 389, 389, 389, 389,
    389, 389, 389, 389, 389, 389, 389, 389,
    389, 389, 389, 389, 389, 389, 389, 389,
    389, 389, 389, 389, 389, 389, 389, 389,
];

/// Base threat count by king position: a king that has left its back
/// rank starts the attack count in the hole.
#[rustfmt::skip]
const BLACK_KING_SAFETY_BASE: [i32; 64] = [
    4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4,
    4, 3, 3, 3, 3, 3, 3, 4,
    3, 1, 1, 1, 1, 1, 1, 3,
    2, 0, 0, 0, 0, 0, 0, 2,
];

static KING_SAFETY_BASE: Lazy<[[i32; 64]; 2]> = Lazy::new(|| {
    let mut tables = [[0; 64]; 2];
    tables[Color::Black as usize] = BLACK_KING_SAFETY_BASE;
    for sq in 0..64 {
        tables[Color::White as usize][sq] = BLACK_KING_SAFETY_BASE[sq ^ 56];
    }
    tables
});

/// Centipawn score from the side-to-move's perspective. When the raw
/// material balance already sits a bishop outside the window the
/// placement terms cannot bring it back, so the balance is returned
/// without touching the board.
pub fn evaluate(board: &Board, pawn_table: &mut PawnTable, alpha: i32, beta: i32) -> i32 {
    let score = lazy_material(board) + TEMPO_BONUS;
    if score + BISHOP_VALUE < alpha || score - BISHOP_VALUE > beta {
        return score;
    }

    let c = board.side_to_move;
    let e = c.opposite();
    let placement = adjusted_placement(board, c, e) - adjusted_placement(board, e, c);

    let (pawn_white, _passed) = pawn_table.probe(board);
    let pawn_score = if c == Color::White { pawn_white } else { -pawn_white };

    score + placement + pawn_score
}

/// The full evaluation with the lazy shortcut disabled.
pub fn full_evaluate(board: &Board, pawn_table: &mut PawnTable) -> i32 {
    evaluate(board, pawn_table, -INF, INF)
}

/// Placement of one side: piece-square values, mobility over squares the
/// enemy pawns do not guard, king-zone pressure, pair/pawn-count
/// adjustments, queen tropism and the pawn shield.
fn adjusted_placement(board: &Board, c: Color, e: Color) -> i32 {
    let us = &board.pieces[c as usize];
    let them = &board.pieces[e as usize];
    let occ = board.all_occupied();
    let friendly = board.occupied[c as usize];

    let guarded = set_pawn_attacks(them[Piece::Pawn as usize], e);
    let available = !friendly & !guarded;

    let enemy_king_sq = board.king_sq(e);
    let enemy_king_zone = king_attacks(enemy_king_sq) | square_mask(enemy_king_sq);
    let endgame = in_endgame(board);
    let own_pawns = pawn_count(board, c);

    let mut placement = 0;
    let mut mobility = 0;
    let mut king_threats = 0u32;

    for sq in iter_bits(us[Piece::Knight as usize]) {
        placement += piece_square(c, Piece::Knight, sq) + KNIGHT_PAWN_ADJUST[own_pawns];
        let attacks = knight_attacks(sq) & available;
        king_threats += (attacks & enemy_king_zone).count_ones();
        mobility += KNIGHT_MOBILITY[attacks.count_ones() as usize];
    }

    for sq in iter_bits(us[Piece::Bishop as usize]) {
        placement += piece_square(c, Piece::Bishop, sq);
        let attacks = bishop_attacks(sq, occ) & available;
        king_threats += (attacks & enemy_king_zone).count_ones();
        mobility += BISHOP_MOBILITY[attacks.count_ones() as usize];
    }
    if us[Piece::Bishop as usize].count_ones() > 1 {
        placement += BISHOP_PAIR_BASE + BISHOP_PAIR_PAWN_ADJUST[pawn_count(board, e)];
    }

    for sq in iter_bits(us[Piece::Rook as usize]) {
        placement += piece_square(c, Piece::Rook, sq) + ROOK_PAWN_ADJUST[own_pawns];
        let attacks = rook_attacks(sq, occ) & available;
        king_threats += (attacks & enemy_king_zone).count_ones();
        mobility += ROOK_MOBILITY[(attacks.count_ones() as usize).min(15)];
    }

    for sq in iter_bits(us[Piece::Queen as usize]) {
        placement += piece_square(c, Piece::Queen, sq);
        let attacks = queen_attacks(sq, occ) & available;
        king_threats += (attacks & enemy_king_zone).count_ones();
        mobility += QUEEN_MOBILITY[(attacks.count_ones() as usize).min(31)];
        placement += QUEEN_TROPISM[chebyshev_distance(sq, enemy_king_sq) as usize];
    }

    for sq in iter_bits(us[Piece::Pawn as usize]) {
        placement += piece_square(c, Piece::Pawn, sq);
    }

    let ksq = board.king_sq(c);
    placement += king_square(c, endgame, ksq);
    if !endgame {
        let shield = popcount(us[Piece::Pawn as usize] & king_shield_mask(c, ksq)).min(3);
        placement += PAWN_SHIELD_BONUS[shield as usize];
    }

    let base = if endgame { 0 } else { KING_SAFETY_BASE[e as usize][enemy_king_sq as usize] };
    let threat_index = ((king_threats as i32 + base).max(0) as usize).min(63);
    placement += KING_THREAT_BONUS[threat_index];

    placement + mobility
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startpos_near_symmetric() {
        let board = Board::startpos();
        let mut table = PawnTable::new();
        let score = full_evaluate(&board, &mut table);
        // only the tempo bonus separates the sides
        assert_eq!(score, TEMPO_BONUS);
    }

    #[test]
    fn test_eval_flips_sign_with_side() {
        let fen_white = "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 0 1";
        let fen_black = "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 0 1";
        let white = Board::from_fen(fen_white).unwrap();
        let black = Board::from_fen(fen_black).unwrap();
        let mut table = PawnTable::new();
        let ws = full_evaluate(&white, &mut table);
        let bs = full_evaluate(&black, &mut table);
        assert_eq!(ws - TEMPO_BONUS, -(bs - TEMPO_BONUS));
    }

    #[test]
    fn test_material_advantage_dominates() {
        let board = Board::from_fen("4k3/8/8/8/8/8/8/QQQQK3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        assert!(full_evaluate(&board, &mut table) > 3000);
    }

    #[test]
    fn test_lazy_eval_shortcut() {
        // four queens up: any narrow window far below the material
        // balance must come back as bare material, no placement noise
        let board = Board::from_fen("4k3/8/8/8/8/8/8/QQQQK3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        let lazy = evaluate(&board, &mut table, -200, 200);
        assert_eq!(lazy, lazy_material(&board) + TEMPO_BONUS);
    }

    #[test]
    fn test_bishop_pair_counts() {
        let pair = Board::from_fen("4k3/8/8/8/8/8/8/2B1KB2 w - - 0 1").unwrap();
        let single = Board::from_fen("4k3/8/8/8/8/8/8/2B1K3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        let with_pair = full_evaluate(&pair, &mut table);
        let without = full_evaluate(&single, &mut table);
        assert!(with_pair > without + BISHOP_VALUE / 2);
    }
}
