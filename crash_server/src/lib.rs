pub mod cli;
pub mod config;
pub mod driver;
pub mod routes;
pub mod store;

pub use driver::{EngineTask, SnapshotFeed, TokioClock};
pub use routes::{build_router, AppState};
