use std::fs;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use crate::server_utils::now_ms;
use crate::types::{RetentionPolicy, ScoreSubmission, StageRecord, SubmitOutcome, SubmitReason};

const RANK_ORDER: &str = "time ASC, created_at ASC, id ASC";

/// Per-stage leaderboard persisted in a single SQLite file.
///
/// The pool holds exactly one connection for the lifetime of the store, and
/// every write additionally goes through `write_lock`, so the read-modify-trim
/// sequence of a submission never interleaves with another writer.
pub struct RankingStore {
    pool: SqlitePool,
    policy: RetentionPolicy,
    write_lock: Mutex<()>,
}

struct BestRow {
    id: i64,
    name: String,
    time: f64,
}

impl RankingStore {
    pub async fn open(path: &Path, policy: RetentionPolicy) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let store = Self::connect(options, policy).await?;
        tracing::info!(path = %path.display(), ?policy, "ranking store opened");
        Ok(store)
    }

    pub async fn in_memory(policy: RetentionPolicy) -> Result<Self, sqlx::Error> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?, policy).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        policy: RetentionPolicy,
    ) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        ensure_schema(&pool).await?;
        let store = Self {
            pool,
            policy,
            write_lock: Mutex::new(()),
        };
        store.enforce_retention().await?;
        Ok(store)
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub async fn submit(&self, entry: &ScoreSubmission) -> Result<SubmitOutcome, sqlx::Error> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let outcome = match self.policy {
            RetentionPolicy::SingleBest => submit_single_best(&mut tx, entry).await?,
            RetentionPolicy::TopK(k) => submit_top_k(&mut tx, entry, k).await?,
        };
        tx.commit().await?;

        tracing::debug!(
            stage = entry.stage,
            name = %entry.name,
            time = entry.time,
            reason = %outcome.reason,
            "score submitted"
        );
        Ok(outcome)
    }

    pub async fn list_records(&self) -> Result<Vec<StageRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT stage, name, time FROM records ORDER BY stage ASC, {RANK_ORDER}"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, sqlx::Error>(StageRecord {
                    stage: row.try_get("stage")?,
                    name: row.try_get("name")?,
                    time: row.try_get("time")?,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Drops rows beyond the policy capacity, e.g. after switching from
    /// top-K to single-best on an existing database.
    async fn enforce_retention(&self) -> Result<(), sqlx::Error> {
        let _guard = self.write_lock.lock().await;
        let removed = sqlx::query(&format!(
            "DELETE FROM records WHERE id NOT IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (PARTITION BY stage ORDER BY {RANK_ORDER}) AS stage_rank
                    FROM records
                ) WHERE stage_rank <= ?
            )"
        ))
        .bind(self.policy.capacity() as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if removed > 0 {
            tracing::warn!(removed, "trimmed records exceeding retention capacity");
        }
        Ok(())
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stage INTEGER NOT NULL,
        name TEXT NOT NULL,
        time REAL NOT NULL,
        created_at INTEGER NOT NULL
    )";

    let columns = sqlx::query("PRAGMA table_info(records)")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut tx = pool.begin().await?;
    if columns.is_empty() {
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
    } else if !columns.iter().any(|column| column == "id") {
        tracing::info!("migrating legacy records table");
        sqlx::query("ALTER TABLE records RENAME TO records_old")
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO records (stage, name, time, created_at)
             SELECT stage, name, time, ? FROM records_old ORDER BY rowid",
        )
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DROP TABLE records_old")
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_stage_time ON records(stage, time, created_at)",
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

async fn best_row(
    tx: &mut Transaction<'_, Sqlite>,
    stage: i64,
) -> Result<Option<BestRow>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT id, name, time FROM records WHERE stage = ? ORDER BY {RANK_ORDER} LIMIT 1"
    ))
    .bind(stage)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| {
        Ok::<_, sqlx::Error>(BestRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            time: row.try_get("time")?,
        })
    })
    .transpose()
}

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &ScoreSubmission,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO records (stage, name, time, created_at) VALUES (?, ?, ?, ?)")
        .bind(entry.stage)
        .bind(&entry.name)
        .bind(entry.time)
        .bind(now_ms())
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn trim_stage(
    tx: &mut Transaction<'_, Sqlite>,
    stage: i64,
    keep: usize,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(&format!(
        "DELETE FROM records WHERE stage = ? AND id NOT IN (
            SELECT id FROM records WHERE stage = ? ORDER BY {RANK_ORDER} LIMIT ?
        )"
    ))
    .bind(stage)
    .bind(stage)
    .bind(keep as i64)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn submit_single_best(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &ScoreSubmission,
) -> Result<SubmitOutcome, sqlx::Error> {
    let Some(current) = best_row(tx, entry.stage).await? else {
        insert_row(tx, entry).await?;
        return Ok(SubmitOutcome {
            updated: true,
            reason: SubmitReason::FirstRecord,
            message: Some("World Record set!".to_string()),
        });
    };

    if entry.time >= current.time {
        return Ok(SubmitOutcome {
            updated: false,
            reason: SubmitReason::NotBetter,
            message: Some(format!(
                "Current record is {}s by {}",
                current.time, current.name
            )),
        });
    }

    sqlx::query("UPDATE records SET name = ?, time = ?, created_at = ? WHERE id = ?")
        .bind(&entry.name)
        .bind(entry.time)
        .bind(now_ms())
        .bind(current.id)
        .execute(&mut **tx)
        .await?;
    trim_stage(tx, entry.stage, 1).await?;

    Ok(SubmitOutcome {
        updated: true,
        reason: SubmitReason::NewWorldRecord,
        message: Some(format!("New World Record! You beat {}", current.name)),
    })
}

async fn submit_top_k(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &ScoreSubmission,
    k: usize,
) -> Result<SubmitOutcome, sqlx::Error> {
    let previous_best = best_row(tx, entry.stage).await?;
    let inserted_id = insert_row(tx, entry).await?;
    trim_stage(tx, entry.stage, k).await?;

    let ranked: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM records WHERE stage = ? ORDER BY {RANK_ORDER}"
    ))
    .bind(entry.stage)
    .fetch_all(&mut **tx)
    .await?;
    let rank = ranked.iter().position(|id| *id == inserted_id);

    let outcome = match (rank, previous_best) {
        (None, _) => SubmitOutcome {
            updated: false,
            reason: SubmitReason::NotInTop(k),
            message: Some(format!("Not fast enough for the top {k}")),
        },
        (Some(_), None) => SubmitOutcome {
            updated: true,
            reason: SubmitReason::FirstRecord,
            message: Some("World Record set!".to_string()),
        },
        (Some(0), Some(previous)) => SubmitOutcome {
            updated: true,
            reason: SubmitReason::NewWorldRecord,
            message: Some(format!("New World Record! You beat {}", previous.name)),
        },
        (Some(position), Some(_)) => SubmitOutcome {
            updated: true,
            reason: SubmitReason::InTop(k),
            message: Some(format!("Top {k} time! Rank #{}", position + 1)),
        },
    };
    Ok(outcome)
}
