// Round log in SQLite. Schema lives in migrations/.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crash_core::{HistoryEntry, Phase, Snapshot};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

#[derive(Debug, sqlx::FromRow)]
struct RoundRow {
    id: i64,
    ts: String,
    crash_point: f64,
    server_seed: String,
    client_seed: String,
    commitment: String,
}

impl TryFrom<RoundRow> for HistoryEntry {
    type Error = anyhow::Error;

    fn try_from(row: RoundRow) -> Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&row.ts)
            .with_context(|| format!("round {} has a bad timestamp '{}'", row.id, row.ts))?
            .with_timezone(&Utc);
        Ok(HistoryEntry {
            round_id: u64::try_from(row.id).context("negative round id")?,
            crash_point: row.crash_point,
            timestamp,
            seed: row.server_seed,
            client_seed: row.client_seed,
            commitment: row.commitment,
        })
    }
}

pub async fn init_db(db: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("running migrations")?;
    Ok(())
}

/// Insert a completed round. Recording the same round twice is a no-op.
pub async fn record_round(db: &SqlitePool, entry: &HistoryEntry) -> Result<bool> {
    let done = sqlx::query(
        "INSERT OR IGNORE INTO rounds (id, ts, crash_point, server_seed, client_seed, commitment) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(i64::try_from(entry.round_id).context("round id out of range")?)
    .bind(entry.timestamp.to_rfc3339())
    .bind(entry.crash_point)
    .bind(&entry.seed)
    .bind(&entry.client_seed)
    .bind(&entry.commitment)
    .execute(db)
    .await?;
    Ok(done.rows_affected() == 1)
}

/// Remember that `round_id` was handed out with `commitment`. Idempotent.
pub async fn record_opened(
    db: &SqlitePool,
    round_id: u64,
    commitment: &str,
    opened_at: DateTime<Utc>,
) -> Result<bool> {
    let done = sqlx::query("INSERT OR IGNORE INTO opened_rounds (id, opened_at, commitment) VALUES (?, ?, ?)")
        .bind(i64::try_from(round_id).context("round id out of range")?)
        .bind(opened_at.to_rfc3339())
        .bind(commitment)
        .execute(db)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Highest round id ever issued, finished or not. 0 on a fresh database.
pub async fn last_round_id(db: &SqlitePool) -> Result<u64> {
    let max: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(id) FROM (SELECT id FROM rounds UNION ALL SELECT id FROM opened_rounds)",
    )
    .fetch_one(db)
    .await?;
    Ok(max.map(u64::try_from).transpose().context("negative round id")?.unwrap_or(0))
}

/// Newest first.
pub async fn recent_rounds(db: &SqlitePool, limit: usize) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query_as::<_, RoundRow>(
        "SELECT id, ts, crash_point, server_seed, client_seed, commitment FROM rounds ORDER BY id DESC LIMIT ?",
    )
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(db)
    .await?;
    rows.into_iter().map(HistoryEntry::try_from).collect()
}

pub async fn find_round(db: &SqlitePool, round_id: u64) -> Result<Option<HistoryEntry>> {
    let Ok(id) = i64::try_from(round_id) else {
        return Ok(None);
    };
    let row = sqlx::query_as::<_, RoundRow>(
        "SELECT id, ts, crash_point, server_seed, client_seed, commitment FROM rounds WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    row.map(HistoryEntry::try_from).transpose()
}

/// Background writer for the round log.
///
/// Every new round id is recorded with its commitment, and every crash with
/// its revealed seed. After falling behind, the whole in-memory history of
/// the next crash is written to fill the gap.
pub struct Recorder {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Recorder {
    /// `last_opened` is the newest round id already on disk.
    pub fn spawn(db: SqlitePool, rx: broadcast::Receiver<Snapshot>, last_opened: u64) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let log = RoundLog {
            db,
            last_opened,
            behind: false,
        };
        let handle = tokio::spawn(log.run(rx, stop_rx));
        Recorder { stop, handle }
    }

    /// Write whatever is already queued, then exit. Call after the engine has
    /// stopped so nothing new arrives.
    pub async fn finish(self) -> Result<()> {
        let _ = self.stop.send(());
        self.handle.await.context("round recorder failed")?;
        Ok(())
    }
}

struct RoundLog {
    db: SqlitePool,
    last_opened: u64,
    behind: bool,
}

impl RoundLog {
    async fn run(mut self, mut rx: broadcast::Receiver<Snapshot>, mut stop: oneshot::Receiver<()>) {
        loop {
            // biased: queued snapshots are written before a stop is honoured
            let recv = tokio::select! {
                biased;
                recv = rx.recv() => recv,
                _ = &mut stop => break,
            };
            match recv {
                Ok(snap) => self.write(&snap).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "round recorder lagged");
                    self.behind = true;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn write(&mut self, snap: &Snapshot) {
        if snap.round_id > self.last_opened {
            match record_opened(&self.db, snap.round_id, &snap.commitment, Utc::now()).await {
                Ok(_) => self.last_opened = snap.round_id,
                Err(e) => error!(round_id = snap.round_id, error = %e, "failed to record opened round"),
            }
        }
        if snap.phase != Phase::Crashed {
            return;
        }
        let pending: Vec<&HistoryEntry> = if self.behind {
            snap.history.iter().collect()
        } else {
            snap.history.iter().take_while(|e| e.round_id == snap.round_id).collect()
        };
        for entry in pending {
            if let Err(e) = record_round(&self.db, entry).await {
                error!(round_id = entry.round_id, error = %e, "failed to record round");
            }
        }
        self.behind = false;
    }
}
