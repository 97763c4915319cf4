pub mod bets;
pub mod clock;
pub mod crash;
pub mod engine;
pub mod fairness;
pub mod history;
pub mod rng;

pub use crate::bets::{Bet, BetError, BetPanel, BetStatus, PanelEvent};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::crash::{crash_point_from_uniform, DEFAULT_INSTANT_CRASH_PROBABILITY};
pub use crate::engine::{EngineConfig, Phase, RoundEngine, Snapshot};
pub use crate::fairness::{recompute_crash_point, verify_entry, Verification};
pub use crate::history::{History, HistoryEntry, DEFAULT_HISTORY_CAP};
pub use crate::rng::{derive_floats, derive_hash_hex, generate_server_seed, HmacSeedSource, ProvablyFairRng, RoundSeed, SeedSource};
