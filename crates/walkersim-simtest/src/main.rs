//! WalkerSim Headless Simulation Harness
//!
//! Validates the walker engine end to end against an in-process hecs host.
//! Runs entirely in-process: no game, no networking, no rendering.
//!
//! Usage:
//!   cargo run -p walkersim-simtest
//!   cargo run -p walkersim-simtest -- --verbose

mod ecs_host;

use std::time::{Duration, Instant};

use ecs_host::{EcsHost, WalkerBody};
use walkersim_core::persistence::{load_simulation, save_simulation};
use walkersim_core::prelude::*;
use walkersim_core::state::TICK_RATE;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn harness_config() -> Config {
    Config {
        random_seed: 20240611,
        max_agents: 2000,
        group_size: 40,
        autosave_interval_secs: None,
        ..Default::default()
    }
}

fn main() {
    let verbose = std::env::args().any(|a| a == "--verbose");
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    println!("=== WalkerSim Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Configuration handling
    results.extend(validate_config(verbose));

    // 2. Determinism & fast advance
    results.extend(validate_determinism(verbose));

    // 3. Grid & group invariants
    results.extend(validate_invariants(verbose));

    // 4. Save/load round trip
    results.extend(validate_persistence(verbose));

    // 5. Host lifecycle on the ECS world
    results.extend(validate_host_lifecycle(verbose));

    // 6. World events
    results.extend(validate_events(verbose));

    // 7. Threaded tick loop
    results.extend(validate_tick_thread(verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

fn harness_state(config: Config) -> WorldState {
    WorldState::new(config).expect("harness configuration is valid")
}

fn snapshot(state: &WorldState) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(e) = save_simulation(&mut buffer, state) {
        log::error!("snapshot failed: {}", e);
    }
    buffer
}

// ── 1. Configuration ────────────────────────────────────────────────────

fn validate_config(_verbose: bool) -> Vec<TestResult> {
    println!("--- Configuration ---");
    let mut results = Vec::new();

    let config = harness_config();
    results.push(TestResult {
        name: "config_valid".into(),
        passed: config.validate().is_ok(),
        detail: format!(
            "{} agents in {} groups",
            config.max_agents,
            config.group_count()
        ),
    });

    let roundtrip = config
        .to_json_string()
        .and_then(|text| Config::from_json_str(&text));
    results.push(TestResult {
        name: "config_json_roundtrip".into(),
        passed: matches!(&roundtrip, Ok(c) if *c == config),
        detail: match &roundtrip {
            Ok(_) => "configuration text reproduces the value".into(),
            Err(e) => format!("round trip failed: {}", e),
        },
    });

    let partial = Config::from_json_str(r#"{ "max_agents": 90, "group_size": 30 }"#);
    results.push(TestResult {
        name: "config_partial_document".into(),
        passed: matches!(&partial, Ok(c) if c.group_count() == 3 && c.random_seed == 1337),
        detail: "missing fields take defaults".into(),
    });

    let bad = [
        ("zero_agents", Config { max_agents: 0, ..harness_config() }),
        ("zero_group", Config { group_size: 0, ..harness_config() }),
        (
            "no_start_policy",
            Config {
                start_position: WorldLocation::None,
                ..harness_config()
            },
        ),
        (
            "despawn_inside_spawn",
            Config {
                despawn_radius: 10.0,
                ..harness_config()
            },
        ),
    ];
    for (name, config) in bad {
        let rejected = matches!(config.validate(), Err(ConfigError::Invalid(_)));
        results.push(TestResult {
            name: format!("config_rejects_{}", name),
            passed: rejected,
            detail: format!("rejected={}", rejected),
        });
    }

    results
}

// ── 2. Determinism ──────────────────────────────────────────────────────

fn validate_determinism(verbose: bool) -> Vec<TestResult> {
    println!("--- Determinism ---");
    let mut results = Vec::new();

    let mut a = harness_state(harness_config());
    let mut b = harness_state(harness_config());
    let start = Instant::now();
    for _ in 0..200 {
        a.tick();
        b.tick();
    }
    let elapsed = start.elapsed();
    results.push(TestResult {
        name: "determinism_same_seed".into(),
        passed: snapshot(&a) == snapshot(&b),
        detail: "two runs from one seed produce identical state".into(),
    });

    let c = harness_state(Config {
        random_seed: 7,
        ..harness_config()
    });
    results.push(TestResult {
        name: "determinism_seed_matters".into(),
        passed: snapshot(&c) != snapshot(&harness_state(harness_config())),
        detail: "different seeds give different populations".into(),
    });

    let sim = match Simulation::new(harness_config()) {
        Ok(sim) => sim,
        Err(e) => {
            results.push(TestResult {
                name: "determinism_fast_advance".into(),
                passed: false,
                detail: format!("simulation creation failed: {}", e),
            });
            return results;
        }
    };
    let advanced = sim.fast_advance(200).is_ok();
    let matches = sim.with_state(|s| snapshot(s) == snapshot(&a));
    results.push(TestResult {
        name: "determinism_fast_advance".into(),
        passed: advanced && matches,
        detail: "fast_advance(200) equals 200 single ticks".into(),
    });

    if verbose {
        println!(
            "  400 ticks of {} agents in {:?} ({:?}/tick)",
            a.agents.len(),
            elapsed,
            elapsed / 400
        );
    }

    results
}

// ── 3. Invariants ───────────────────────────────────────────────────────

fn validate_invariants(verbose: bool) -> Vec<TestResult> {
    println!("--- Grid & Groups ---");
    let mut results = Vec::new();

    for (name, policy, grouped) in [
        ("border_grouped", WorldLocation::RandomBorderLocation, true),
        ("random_scattered", WorldLocation::RandomLocation, false),
        ("mixed_grouped", WorldLocation::Mixed, true),
    ] {
        let mut state = harness_state(Config {
            start_position: policy,
            start_agents_grouped: grouped,
            ..harness_config()
        });
        let mut failure = None;
        for tick in 0..300 {
            state.tick();
            if tick % 50 == 0 {
                if let Err(e) = state.check_invariants() {
                    failure = Some(format!("tick {}: {}", tick, e));
                    break;
                }
            }
        }
        let in_bounds = state.agents.iter().all(|a| {
            a.position.x >= state.world_mins.x
                && a.position.x < state.world_maxs.x
                && a.position.y >= state.world_mins.y
                && a.position.y < state.world_maxs.y
        });
        results.push(TestResult {
            name: format!("invariants_{}", name),
            passed: failure.is_none() && in_bounds,
            detail: failure.unwrap_or_else(|| format!("grid holds {} agents", state.grid.len())),
        });
    }

    let mut state = harness_state(harness_config());
    let resized = Vec3::xy(-800.0, -400.0);
    state.set_world_size(resized, Vec3::xy(800.0, 400.0));
    for _ in 0..100 {
        state.tick();
    }
    results.push(TestResult {
        name: "invariants_after_resize".into(),
        passed: state.check_invariants().is_ok() && state.grid.cell_count() == 16 * 8,
        detail: format!("{}x{} cells", state.grid.cols(), state.grid.rows()),
    });

    if verbose {
        let busiest = state.grid.cells().iter().map(Vec::len).max().unwrap_or(0);
        println!("  busiest cell after resize: {} agents", busiest);
    }

    results
}

// ── 4. Persistence ──────────────────────────────────────────────────────

fn validate_persistence(verbose: bool) -> Vec<TestResult> {
    println!("--- Save/Load ---");
    let mut results = Vec::new();

    let mut state = harness_state(harness_config());
    for _ in 0..120 {
        state.tick();
    }
    state.add_event(WorldEvent::new(
        EventType::Noise,
        state.agents[0].position,
        300.0,
        1.0,
    ));
    let bytes = snapshot(&state);

    let loaded = load_simulation(&bytes[..]);
    let reencoded = loaded.as_ref().map(snapshot).unwrap_or_default();
    results.push(TestResult {
        name: "persistence_roundtrip".into(),
        passed: reencoded == bytes,
        detail: match &loaded {
            Ok(_) => format!("{} bytes reproduced exactly", bytes.len()),
            Err(e) => format!("load failed: {}", e),
        },
    });

    if let Ok(mut restored) = loaded {
        for _ in 0..200 {
            state.tick();
            restored.tick();
        }
        results.push(TestResult {
            name: "persistence_continuation".into(),
            passed: snapshot(&state) == snapshot(&restored),
            detail: "restored state ticks identically".into(),
        });
    }

    let mut corrupt = bytes.clone();
    corrupt[1] ^= 0x5A;
    results.push(TestResult {
        name: "persistence_bad_magic".into(),
        passed: matches!(load_simulation(&corrupt[..]), Err(SaveError::BadMagic { .. })),
        detail: "corrupted magic is rejected".into(),
    });

    let truncated = &bytes[..bytes.len() / 3];
    results.push(TestResult {
        name: "persistence_truncated".into(),
        passed: load_simulation(truncated).is_err(),
        detail: "truncated stream is rejected".into(),
    });

    if verbose {
        println!(
            "  save size: {} bytes for {} agents",
            bytes.len(),
            state.agents.len()
        );
    }

    results
}

// ── 5. Host Lifecycle ───────────────────────────────────────────────────

fn validate_host_lifecycle(verbose: bool) -> Vec<TestResult> {
    println!("--- Host Lifecycle ---");
    let mut results = Vec::new();

    let mut state = harness_state(harness_config());
    let mut host = EcsHost::new(60);
    let camera = host.add_observer(state.agents[0].position);

    // Frame loop: one tick plus housekeeping, then one host update.
    let mut spawned = 0;
    for _ in 0..40 {
        state.tick();
        state.check_agent_spawn();
        spawned += state.game_update(&mut host).spawned;
        host.step(TICK_RATE);
    }
    results.push(TestResult {
        name: "lifecycle_spawns_near_observer".into(),
        passed: spawned > 0 && host.walker_count() == state.active.len(),
        detail: format!("{} walkers materialized", spawned),
    });
    results.push(TestResult {
        name: "lifecycle_half_host_cap".into(),
        passed: host.walker_count() <= 30,
        detail: format!("{} alive of host max 60", host.walker_count()),
    });

    let bodies_match = host
        .world
        .query::<&WalkerBody>()
        .iter()
        .all(|(_, body)| state.agents[body.agent].is_active() && body.class_id > 0);
    results.push(TestResult {
        name: "lifecycle_bodies_match_agents".into(),
        passed: bodies_match,
        detail: "every walker body belongs to an active agent".into(),
    });

    // Kill one through the engine, lose another behind its back.
    let handles = host.walker_handles();
    let mut dead_ok = false;
    let mut lost_ok = false;
    if let [killed, lost, ..] = *handles.as_slice() {
        host.kill(killed);
        dead_ok = state.entity_killed(killed);
        host.kill(lost);
        let summary = state.game_update(&mut host);
        lost_ok = summary.lost == 1;
    }
    results.push(TestResult {
        name: "lifecycle_kill_and_loss".into(),
        passed: dead_ok && lost_ok && state.check_invariants().is_ok(),
        detail: format!("killed={} lost={}", dead_ok, lost_ok),
    });

    // Camera leaves; everything is released.
    host.move_observer(camera, Vec3::xy(1.0e5, 1.0e5));
    let summary = state.game_update(&mut host);
    results.push(TestResult {
        name: "lifecycle_despawn_when_unobserved".into(),
        passed: state.active.is_empty() && host.walker_count() == 0,
        detail: format!("{} walkers released", summary.despawned),
    });

    // The dead agent comes back on the next sweep.
    for _ in 0..2 {
        state.check_agent_spawn();
    }
    let none_dead = state.agents.iter().all(|a| a.state != AgentState::Dead);
    results.push(TestResult {
        name: "lifecycle_respawn".into(),
        passed: none_dead && state.check_invariants().is_ok(),
        detail: "dead agents respawn as inactive".into(),
    });

    if verbose {
        let mut per_state = [0usize; 4];
        for agent in &state.agents {
            per_state[agent.state as usize] += 1;
        }
        println!(
            "  inactive={} queued={} active={} dead={}",
            per_state[0], per_state[1], per_state[2], per_state[3]
        );
    }

    results
}

// ── 6. World Events ─────────────────────────────────────────────────────

fn validate_events(_verbose: bool) -> Vec<TestResult> {
    println!("--- World Events ---");
    let mut results = Vec::new();

    let mut state = harness_state(harness_config());
    state.add_event(WorldEvent::new(EventType::Noise, Vec3::ZERO, 10.0, 1.0));
    let mut alive_ticks = 0;
    while !state.events.is_empty() && alive_ticks < 100 {
        state.tick();
        alive_ticks += 1;
    }
    results.push(TestResult {
        name: "events_decay_exactly".into(),
        passed: alive_ticks == 10,
        detail: format!("radius 10 / decay 1 expired after {} ticks", alive_ticks),
    });

    let rejected = !state.add_event(WorldEvent::new(EventType::Deterrent, Vec3::ZERO, 0.0, 1.0));
    results.push(TestResult {
        name: "events_reject_empty".into(),
        passed: rejected,
        detail: "zero-radius events are refused".into(),
    });

    results
}

// ── 7. Tick Thread ──────────────────────────────────────────────────────

fn validate_tick_thread(verbose: bool) -> Vec<TestResult> {
    println!("--- Tick Thread ---");
    let mut results = Vec::new();

    let sim = match Simulation::new(Config {
        max_agents: 500,
        ..harness_config()
    }) {
        Ok(sim) => sim,
        Err(e) => {
            results.push(TestResult {
                name: "thread_create".into(),
                passed: false,
                detail: format!("{}", e),
            });
            return results;
        }
    };

    let started = sim.start().is_ok();
    std::thread::sleep(Duration::from_millis(250));
    let blocked = matches!(sim.fast_advance(1), Err(SimulationError::Running));

    sim.set_paused(true);
    std::thread::sleep(Duration::from_millis(60));
    let paused_at = sim.with_state(|s| s.ticks);
    std::thread::sleep(Duration::from_millis(100));
    let paused_held = sim.with_state(|s| s.ticks) == paused_at;
    sim.set_paused(false);

    sim.stop();
    let ticks = sim.with_state(|s| s.ticks);
    let stats = sim.tick_stats();

    results.push(TestResult {
        name: "thread_ticks".into(),
        passed: started && ticks > 0 && !sim.is_running(),
        detail: format!("{} ticks, avg {:?}", ticks, stats.average_tick),
    });
    results.push(TestResult {
        name: "thread_fast_advance_blocked".into(),
        passed: blocked,
        detail: "fast_advance refused while the thread runs".into(),
    });
    results.push(TestResult {
        name: "thread_pause".into(),
        passed: paused_held,
        detail: "no ticks while paused".into(),
    });

    if verbose {
        println!(
            "  last tick {:?}, average {:?}",
            stats.last_tick, stats.average_tick
        );
    }

    results
}
