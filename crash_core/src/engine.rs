use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    crash::{crash_point_from_uniform, DEFAULT_INSTANT_CRASH_PROBABILITY},
    history::{History, HistoryEntry, DEFAULT_HISTORY_CAP},
    rng::{derive_hash_hex, RoundSeed, SeedSource},
};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Betting window before take-off.
    pub wait: Duration,
    /// Pause after a crash before the next round opens.
    pub cooldown: Duration,
    /// Per-second growth of the multiplier relative to itself.
    pub growth_rate: f64,
    pub instant_crash_probability: f64,
    pub history_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            cooldown: Duration::from_secs(3),
            growth_rate: 0.05,
            instant_crash_probability: DEFAULT_INSTANT_CRASH_PROBABILITY,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Flying,
    Crashed,
}

/// Read-only view of the engine handed to observers.
///
/// `seed`, `client_seed` and `crash_point` stay `None` until the round has
/// crashed. `history` is shared between snapshots until the next crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub round_id: u64,
    pub phase: Phase,
    pub multiplier: f64,
    pub next_phase_deadline: Option<DateTime<Utc>>,
    pub commitment: String,
    pub seed: Option<String>,
    pub client_seed: Option<String>,
    pub crash_point: Option<f64>,
    pub history: Arc<[HistoryEntry]>,
}

#[derive(Debug)]
struct Round {
    id: u64,
    phase: Phase,
    multiplier: f64,
    crash_point: f64,
    seed: RoundSeed,
    commitment: String,
    deadline: Option<Instant>,
    deadline_wall: Option<DateTime<Utc>>,
    last_tick: Instant,
}

impl Round {
    fn due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

type Observer = Box<dyn FnMut(&Snapshot) + Send>;

/// Owns the current round and the history, and advances both on `tick`.
pub struct RoundEngine<C, S> {
    config: EngineConfig,
    clock: C,
    seeds: S,
    round: Round,
    history: History,
    observers: Vec<Observer>,
}

impl<C: Clock, S: SeedSource> RoundEngine<C, S> {
    pub fn new(config: EngineConfig, clock: C, seeds: S) -> Self {
        Self::resume(config, clock, seeds, Vec::new(), 0)
    }

    /// Start from persisted history (newest first).
    ///
    /// `last_round_id` is the highest id ever handed out, including a round
    /// that was open but never crashed; its commitment is already public, so
    /// numbering continues after it.
    pub fn resume(
        config: EngineConfig,
        clock: C,
        mut seeds: S,
        history: Vec<HistoryEntry>,
        last_round_id: u64,
    ) -> Self {
        let completed = history.iter().map(|e| e.round_id).max().unwrap_or(0);
        let first_id = completed.max(last_round_id) + 1;
        let history = History::from_newest_first(config.history_cap, history);
        let round = open_round(&config, &clock, &mut seeds, first_id);
        debug!(round_id = round.id, commitment = %round.commitment, "round open");
        Self {
            config,
            clock,
            seeds,
            round,
            history,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn round_id(&self) -> u64 {
        self.round.id
    }

    pub fn phase(&self) -> Phase {
        self.round.phase
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Register an observer. It sees the current snapshot right away, then
    /// every emission after that.
    pub fn subscribe<F>(&mut self, mut observer: F)
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        observer(&self.snapshot());
        self.observers.push(Box::new(observer));
    }

    pub fn snapshot(&self) -> Snapshot {
        let round = &self.round;
        let revealed = round.phase == Phase::Crashed;
        Snapshot {
            round_id: round.id,
            phase: round.phase,
            multiplier: round.multiplier,
            next_phase_deadline: round.deadline_wall,
            commitment: round.commitment.clone(),
            seed: revealed.then(|| round.seed.server_seed.clone()),
            client_seed: revealed.then(|| round.seed.client_seed.clone()),
            crash_point: revealed.then_some(round.crash_point),
            history: self.history.shared(),
        }
    }

    /// Advance by whatever time the clock says has passed.
    ///
    /// At most one transition of each kind happens per tick, so even a
    /// zero-length wait and cooldown cannot spin.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        if self.round.phase == Phase::Crashed && self.round.due(now) {
            self.next_round();
        }
        if self.round.phase == Phase::Waiting && self.round.due(now) {
            self.take_off();
        }
        if self.round.phase == Phase::Flying {
            self.fly(now);
        }
    }

    fn take_off(&mut self) {
        let round = &mut self.round;
        assert!(!round.commitment.is_empty(), "round {} flying without a commitment", round.id);
        // flight starts at the deadline, not at the (possibly late) tick
        if let Some(deadline) = round.deadline.take() {
            round.last_tick = round.last_tick.max(deadline);
        }
        round.phase = Phase::Flying;
        round.deadline_wall = None;
        debug!(round_id = round.id, "take off");
        self.emit();
    }

    fn fly(&mut self, now: Instant) {
        let round = &mut self.round;
        // a clock that went backwards counts as no time passing
        let elapsed = now.saturating_duration_since(round.last_tick).as_secs_f64();
        round.last_tick = round.last_tick.max(now);
        if elapsed == 0.0 && round.multiplier < round.crash_point {
            return;
        }

        let grown = round.multiplier + round.multiplier * self.config.growth_rate * elapsed;
        if grown >= round.crash_point {
            round.multiplier = round.crash_point;
            self.crash(now);
        } else {
            round.multiplier = grown;
            self.emit();
        }
    }

    fn crash(&mut self, now: Instant) {
        let wall = self.clock.wall_now();
        let round = &mut self.round;
        round.phase = Phase::Crashed;
        round.deadline = Some(now + self.config.cooldown);
        round.deadline_wall = Some(wall + to_chrono(self.config.cooldown));

        let entry = HistoryEntry {
            round_id: round.id,
            crash_point: round.crash_point,
            timestamp: wall,
            seed: round.seed.server_seed.clone(),
            client_seed: round.seed.client_seed.clone(),
            commitment: round.commitment.clone(),
        };
        info!(round_id = round.id, crash_point = round.crash_point, "crashed");
        self.history.push(entry);
        self.emit();
    }

    fn next_round(&mut self) {
        let id = self.round.id + 1;
        self.round = open_round(&self.config, &self.clock, &mut self.seeds, id);
        debug!(round_id = id, commitment = %self.round.commitment, "round open");
        self.emit();
    }

    fn emit(&mut self) {
        self.check_invariants();
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in self.observers.iter_mut() {
            observer(&snapshot);
        }
    }

    fn check_invariants(&self) {
        let round = &self.round;
        assert!(
            round.multiplier <= round.crash_point,
            "round {} multiplier {} above crash point {}",
            round.id,
            round.multiplier,
            round.crash_point
        );
        assert!(
            round.phase == Phase::Flying || round.phase == Phase::Crashed || round.multiplier == 1.0,
            "round {} moved its multiplier before take-off",
            round.id
        );
    }
}

fn open_round<C: Clock, S: SeedSource>(config: &EngineConfig, clock: &C, seeds: &mut S, id: u64) -> Round {
    let seed = seeds.draw(id);
    // the crash point is fixed here, before any bet can be seen
    let crash_point = crash_point_from_uniform(seed.uniform, config.instant_crash_probability);
    let commitment = derive_hash_hex(seed.server_seed.as_bytes());
    let now = clock.now();
    Round {
        id,
        phase: Phase::Waiting,
        multiplier: 1.0,
        crash_point,
        seed,
        commitment,
        deadline: Some(now + config.wait),
        deadline_wall: Some(clock.wall_now() + to_chrono(config.wait)),
        last_tick: now,
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
