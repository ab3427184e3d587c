use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::models::RunRow;
use crate::error::Result;
use crate::types::RunRecord;

/// Durable run history, partitioned by (uid, theme) and keyed by run id.
///
/// Merges are all-or-nothing and serialized through `write_lock`, so two
/// overlapping refreshes can never interleave half-written batches.
pub struct RunStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl RunStore {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self::init(pool).await?;
        info!("Run store ready at {path}");
        Ok(store)
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory instance.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Release the underlying connections. Waits for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert-or-replace every record that has an id. Records without one are
    /// skipped. Returns the number of rows written.
    pub async fn merge_runs(&self, uid: &str, theme: &str, records: &[RunRecord]) -> Result<usize> {
        let rows: Vec<(&RunRecord, String)> = records
            .iter()
            .filter(|r| !r.id.is_empty())
            .map(|r| {
                let mut owned = r.clone();
                owned.owner_uid = uid.to_string();
                owned.theme = theme.to_string();
                serde_json::to_string(&owned).map(|json| (r, json))
            })
            .collect::<std::result::Result<_, _>>()?;

        let skipped = records.len() - rows.len();
        if rows.is_empty() {
            if skipped > 0 {
                debug!(uid, theme, skipped, "No mergeable runs in batch");
            }
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for (record, json) in &rows {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO rogue_runs (id, uid, theme, start_ts, record_data)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(uid)
            .bind(theme)
            .bind(record.start_ts)
            .bind(json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(uid, theme, merged = rows.len(), skipped, "Merged runs into store");
        Ok(rows.len())
    }

    /// Every stored run of the partition, most recent start first.
    /// Equal start times fall back to id order so output is stable.
    pub async fn get_all_runs(&self, uid: &str, theme: &str) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, uid, theme, start_ts, record_data
            FROM rogue_runs
            WHERE uid = ? AND theme = ?
            ORDER BY start_ts DESC, id ASC
            "#,
        )
        .bind(uid)
        .bind(theme)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<RunRecord> {
                let mut record: RunRecord = serde_json::from_str(&row.record_data)?;
                record.owner_uid = row.uid;
                record.theme = row.theme;
                Ok(record)
            })
            .collect()
    }

    pub async fn count_runs(&self, uid: &str, theme: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rogue_runs WHERE uid = ? AND theme = ?")
                .bind(uid)
                .bind(theme)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn record(id: &str, start_ts: i64, score: i64) -> RunRecord {
        RunRecord {
            id: id.to_string(),
            owner_uid: "u1".to_string(),
            theme: "t".to_string(),
            start_ts,
            end_ts: start_ts + 3600,
            difficulty: "15".to_string(),
            squad: Some("指挥分队".to_string()),
            score,
            success: true,
            last_stage: None,
            relics: BTreeSet::from(["R3".to_string()]),
            totems: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let store = RunStore::open_in_memory().await.unwrap();
        let batch = vec![record("a", 10, 200), record("b", 20, 300)];

        store.merge_runs("u1", "t", &batch).await.unwrap();
        let first = store.get_all_runs("u1", "t").await.unwrap();
        store.merge_runs("u1", "t", &batch).await.unwrap();
        let second = store.get_all_runs("u1", "t").await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn merge_replaces_whole_record_by_id() {
        let store = RunStore::open_in_memory().await.unwrap();
        store.merge_runs("u1", "t", &[record("a", 10, 200)]).await.unwrap();

        let mut updated = record("a", 10, 999);
        updated.squad = None;
        store.merge_runs("u1", "t", &[updated]).await.unwrap();

        let runs = store.get_all_runs("u1", "t").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].score, 999);
        assert_eq!(runs[0].squad, None);
    }

    #[tokio::test]
    async fn runs_come_back_most_recent_first() {
        let store = RunStore::open_in_memory().await.unwrap();
        store
            .merge_runs(
                "u1",
                "t",
                &[record("mid", 20, 1), record("old", 10, 1), record("new", 30, 1)],
            )
            .await
            .unwrap();
        store.merge_runs("u1", "t", &[record("tie", 20, 1)]).await.unwrap();

        let ids: Vec<String> = store
            .get_all_runs("u1", "t")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "tie", "old"]);
    }

    #[tokio::test]
    async fn records_without_id_are_skipped() {
        let store = RunStore::open_in_memory().await.unwrap();
        let written = store
            .merge_runs("u1", "t", &[record("", 10, 1), record("a", 20, 1)])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count_runs("u1", "t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_inputs_are_not_errors() {
        let store = RunStore::open_in_memory().await.unwrap();
        assert_eq!(store.merge_runs("u1", "t", &[]).await.unwrap(), 0);
        assert!(store.get_all_runs("u1", "t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let store = RunStore::open_in_memory().await.unwrap();
        store.merge_runs("u1", "t", &[record("a", 10, 1)]).await.unwrap();
        store.merge_runs("u2", "t", &[record("b", 10, 1)]).await.unwrap();
        store.merge_runs("u1", "other", &[record("c", 10, 1)]).await.unwrap();

        let runs = store.get_all_runs("u1", "t").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "a");
        assert_eq!(store.get_all_runs("u2", "t").await.unwrap()[0].owner_uid, "u2");
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_rows() {
        let store = RunStore::open_in_memory().await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_bad_run BEFORE INSERT ON rogue_runs
            WHEN NEW.id = 'bad'
            BEGIN SELECT RAISE(ABORT, 'rejected'); END
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let batch = [record("a", 10, 200), record("bad", 20, 200), record("c", 30, 200)];
        assert!(store.merge_runs("u1", "t", &batch).await.is_err());
        assert_eq!(store.count_runs("u1", "t").await.unwrap(), 0);

        store.merge_runs("u1", "t", &[record("a", 10, 200)]).await.unwrap();
        assert_eq!(store.count_runs("u1", "t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn overlapping_merges_produce_union() {
        let store = std::sync::Arc::new(RunStore::open_in_memory().await.unwrap());
        let first = [record("a", 10, 200), record("b", 20, 200)];
        let second = [record("b", 20, 200), record("c", 30, 200)];

        let (left, right) = {
            let s1 = std::sync::Arc::clone(&store);
            let s2 = std::sync::Arc::clone(&store);
            tokio::join!(
                tokio::spawn(async move { s1.merge_runs("u1", "t", &first).await }),
                tokio::spawn(async move { s2.merge_runs("u1", "t", &second).await }),
            )
        };
        assert_eq!(left.unwrap().unwrap(), 2);
        assert_eq!(right.unwrap().unwrap(), 2);

        let ids: Vec<String> = store
            .get_all_runs("u1", "t")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let path = std::env::temp_dir().join(format!("rogue_store_{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let store = RunStore::open(&path).await.unwrap();
        store.merge_runs("u1", "t", &[record("a", 10, 1)]).await.unwrap();
        store.close().await;

        let reopened = RunStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_all_runs("u1", "t").await.unwrap().len(), 1);
        reopened.close().await;

        let _ = std::fs::remove_file(&path);
    }
}
