use std::time::Duration;

use crash_core::{verify_entry, EngineConfig, HmacSeedSource, ManualClock, Phase, RoundEngine};

fn main() {
    // Play a few rounds headless on a simulated clock and audit them
    let clock = ManualClock::new();
    let config = EngineConfig::default();
    let p = config.instant_crash_probability;
    let mut engine = RoundEngine::new(config, clock.clone(), HmacSeedSource::new("example-client-seed"));
    engine.subscribe(|s| {
        if s.phase != Phase::Flying {
            println!("round={} phase={:?} multiplier={:.2} commitment={}", s.round_id, s.phase, s.multiplier, s.commitment);
        }
    });

    while engine.round_id() <= 5 {
        clock.advance(Duration::from_millis(16));
        engine.tick();
    }

    for entry in engine.history().iter() {
        let v = verify_entry(entry, p);
        println!(
            "round={} crash_point={:.2} seed={} fair={}",
            entry.round_id,
            entry.crash_point,
            entry.seed,
            v.is_fair()
        );
    }
}
