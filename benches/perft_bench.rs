use criterion::{criterion_group, criterion_main, Criterion};

use ferrum::board::position::Board;
use ferrum::movegen::generate::perft;

fn perft_startpos(c: &mut Criterion) {
    ferrum::init_tables();
    let mut board = Board::startpos();
    c.bench_function("perft_startpos_4", |b| {
        b.iter(|| {
            assert_eq!(perft(&mut board, 4), 197_281);
        })
    });
}

fn perft_kiwipete(c: &mut Criterion) {
    ferrum::init_tables();
    let mut board = Board::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    )
    .unwrap();
    c.bench_function("perft_kiwipete_3", |b| {
        b.iter(|| {
            assert_eq!(perft(&mut board, 3), 97_862);
        })
    });
}

criterion_group!(benches, perft_startpos, perft_kiwipete);
criterion_main!(benches);
