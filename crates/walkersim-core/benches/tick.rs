use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use walkersim_core::config::Config;
use walkersim_core::state::WorldState;

fn bench_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");
    let samples: usize = std::env::var("WALKERSIM_BENCH_SAMPLES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(20);
    group.sample_size(samples);
    group.measurement_time(Duration::from_secs(8));

    // Ticks per bench iteration (can override via WALKERSIM_BENCH_TICKS)
    let ticks: usize = std::env::var("WALKERSIM_BENCH_TICKS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(40);
    let agents_list: Vec<usize> = std::env::var("WALKERSIM_BENCH_AGENTS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![1000_usize, 4000, 10000]);

    for &agents in &agents_list {
        group.bench_function(format!("ticks{}_agents{}", ticks, agents), |b| {
            b.iter_batched(
                || {
                    WorldState::new(Config {
                        random_seed: 0xBEEF,
                        max_agents: agents,
                        autosave_interval_secs: None,
                        ..Default::default()
                    })
                    .expect("bench config is valid")
                },
                |mut state| {
                    for _ in 0..ticks {
                        state.tick();
                    }
                    state
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
