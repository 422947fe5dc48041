//! Move processing benchmarks for the drawing engine.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use scribble_bench::RunningGame;
use scribble_core::GameEngine;
use serde_json::json;

fn bench_draw(c: &mut Criterion) {
    let stroke = json!({"type": "draw", "points": [[0, 0], [10, 10], [20, 5]], "color": "#000000"});
    c.bench_function("drawing/draw_8_players", |b| {
        b.iter_batched(
            || RunningGame::new(8, 4),
            |mut running| {
                let drawer = running.seats.users[0];
                let outcome = running
                    .engine
                    .process_move(&mut running.game, drawer, black_box(&stroke));
                (running, outcome)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_guesses(c: &mut Criterion) {
    let wrong = json!({"type": "guess", "text": "Elma"});
    let right = json!({"type": "guess", "text": " saat "});

    c.bench_function("drawing/wrong_guess_8_players", |b| {
        b.iter_batched(
            || RunningGame::new(8, 4),
            |mut running| {
                let guesser = running.seats.users[1];
                let outcome = running
                    .engine
                    .process_move(&mut running.game, guesser, black_box(&wrong));
                (running, outcome)
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("drawing/correct_guess_8_players", |b| {
        b.iter_batched(
            || RunningGame::new(8, 4),
            |mut running| {
                let guesser = running.seats.users[1];
                let outcome = running
                    .engine
                    .process_move(&mut running.game, guesser, black_box(&right));
                (running, outcome)
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_draw, bench_guesses);
criterion_main!(benches);
