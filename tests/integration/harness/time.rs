use bevy::prelude::*;

use settlement_core::workers::Orchestrator;

pub fn current_tick(app: &App) -> u64 {
    app.world().resource::<Orchestrator>().tick_count()
}

/// One frame applies queued commands and advances exactly one tick.
pub fn tick(app: &mut App) {
    app.update();
}

pub fn tick_n(app: &mut App, ticks: u64) {
    advance_to(app, current_tick(app) + ticks);
}

pub fn advance_to(app: &mut App, target: u64) {
    while current_tick(app) < target {
        app.update();
    }
}

/// Ticks until `condition` holds and returns how many ticks that took.
pub fn tick_until(
    app: &mut App,
    max_ticks: u64,
    condition: impl Fn(&World) -> bool,
    msg: &str,
) -> u64 {
    let start = current_tick(app);
    loop {
        let elapsed = current_tick(app) - start;
        if condition(app.world()) {
            return elapsed;
        }
        assert!(
            elapsed < max_ticks,
            "still waiting at tick {} after {max_ticks} ticks: {msg}",
            current_tick(app)
        );
        app.update();
    }
}
