//! Fixed-cadence simulation driver.

use crate::fanout;
use crate::state::SharedWorld;
use log::debug;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs the simulation at `tick_rate` updates per second until the task
/// is dropped. Each tick advances every `playing` room and broadcasts
/// the resulting snapshots; waiting rooms are left alone.
///
/// `Delay` tick behavior means an overrunning tick pushes later ticks
/// back rather than bursting to catch up, so sustained overrun shows up
/// as timing drift instead of a thundering herd.
pub async fn run(world: SharedWorld, tick_rate: u32) {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick fires immediately; skip it so the cadence starts
    // one period from now.
    ticker.tick().await;

    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        tick += 1;

        let updates = {
            let mut world = world.write().await;
            world.rooms.step_playing_rooms()
        };

        if updates.is_empty() {
            continue;
        }

        if tick % tick_rate as u64 == 0 {
            debug!("tick {}: {} playing room(s)", tick, updates.len());
        }

        let world = world.read().await;
        for (members, state) in updates {
            fanout::broadcast_state(&world.sessions, &members, state);
        }
    }
}
