use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use crash_core::{
    derive_hash_hex, recompute_crash_point, verify_entry, HistoryEntry, DEFAULT_INSTANT_CRASH_PROBABILITY,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

#[derive(Parser)]
#[command(name = "crash-cli", about = "Operator CLI for the crash round log")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Database URL, default sqlite://crash.db
    #[arg(long, value_parser, env = "DATABASE_URL")]
    database_url: Option<String>,
    /// Instant-crash probability the rounds were played with
    #[arg(long, default_value_t = DEFAULT_INSTANT_CRASH_PROBABILITY)]
    instant_crash_probability: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// View the last N completed rounds
    ViewRounds {
        #[arg(default_value_t = 20)]
        n: i64,
    },
    /// Export all rounds to CSV path
    ExportCsv { path: String },
    /// Re-derive a logged round from its revealed seed
    Verify { round_id: u64 },
    /// Compute commitment and crash point for a seed without a database
    VerifySeed {
        #[arg(long)]
        server_seed: String,
        #[arg(long)]
        client_seed: String,
        #[arg(long)]
        round_id: u64,
    },
}

#[derive(sqlx::FromRow)]
struct RoundRow {
    id: i64,
    ts: String,
    crash_point: f64,
    server_seed: String,
    client_seed: String,
    commitment: String,
}

impl RoundRow {
    fn into_entry(self) -> anyhow::Result<HistoryEntry> {
        Ok(HistoryEntry {
            round_id: u64::try_from(self.id)?,
            crash_point: self.crash_point,
            timestamp: DateTime::parse_from_rfc3339(&self.ts)?.with_timezone(&Utc),
            seed: self.server_seed,
            client_seed: self.client_seed,
            commitment: self.commitment,
        })
    }
}

async fn get_pool(url: Option<String>) -> anyhow::Result<SqlitePool> {
    let url = url.unwrap_or_else(|| "sqlite://crash.db".into());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let p = cli.instant_crash_probability;

    if let Commands::VerifySeed {
        server_seed,
        client_seed,
        round_id,
    } = &cli.command
    {
        let commitment = derive_hash_hex(server_seed.as_bytes());
        let crash_point = recompute_crash_point(server_seed, client_seed, *round_id, p);
        println!("round={} commitment={} crash_point={:.2}", round_id, commitment, crash_point);
        return Ok(());
    }

    let pool = get_pool(cli.database_url).await?;

    match cli.command {
        Commands::ViewRounds { n } => {
            let rows = sqlx::query_as::<_, RoundRow>(
                "SELECT id, ts, crash_point, server_seed, client_seed, commitment FROM rounds ORDER BY id DESC LIMIT ?",
            )
            .bind(n)
            .fetch_all(&pool)
            .await?;
            for r in rows {
                println!(
                    "#{:>6} {} crash={:>8.2} commitment={} seed={}",
                    r.id, r.ts, r.crash_point, r.commitment, r.server_seed
                );
            }
        }
        Commands::ExportCsv { path } => {
            let mut wtr = csv::Writer::from_path(&path)?;
            wtr.write_record(["id", "ts", "crash_point", "server_seed", "client_seed", "commitment"])?;
            let rows = sqlx::query_as::<_, RoundRow>(
                "SELECT id, ts, crash_point, server_seed, client_seed, commitment FROM rounds ORDER BY id ASC",
            )
            .fetch_all(&pool)
            .await?;
            let total = rows.len();
            for r in &rows {
                wtr.write_record([
                    r.id.to_string(),
                    r.ts.clone(),
                    format!("{:.2}", r.crash_point),
                    r.server_seed.clone(),
                    r.client_seed.clone(),
                    r.commitment.clone(),
                ])?;
            }
            wtr.flush()?;
            println!("Exported {} rows to {}", total, path);
        }
        Commands::Verify { round_id } => {
            let row = sqlx::query_as::<_, RoundRow>(
                "SELECT id, ts, crash_point, server_seed, client_seed, commitment FROM rounds WHERE id = ?",
            )
            .bind(i64::try_from(round_id)?)
            .fetch_optional(&pool)
            .await?;
            let Some(row) = row else {
                anyhow::bail!("round {} is not in the log", round_id);
            };
            let entry = row.into_entry()?;
            let v = verify_entry(&entry, p);
            println!(
                "round={} crashed_at={} logged={:.2} recomputed={:.2} commitment_ok={} crash_point_ok={}",
                entry.round_id,
                entry.timestamp.to_rfc3339(),
                entry.crash_point,
                v.recomputed_crash_point,
                v.commitment_matches,
                v.crash_point_matches
            );
            if !v.is_fair() {
                anyhow::bail!("round {} does not verify", round_id);
            }
        }
        Commands::VerifySeed { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}
