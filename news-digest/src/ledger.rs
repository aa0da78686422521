use crate::types::Result;
use chrono::Utc;
use interfaces::{DeliveredItem, HistoryEntry, ReaderId};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashSet;
use tracing::info;

/// Durable record of what each reader has already received. A (reader, url)
/// pair is stored at most once, so writing the same item again is harmless.
#[derive(Clone)]
pub struct HistoryLedger {
    db: SqlitePool,
}

impl HistoryLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn has_delivered(&self, reader_id: ReaderId, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM news_history WHERE reader_id = ? AND url = ? LIMIT 1")
            .bind(reader_id)
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    pub async fn delivered_urls(&self, reader_id: ReaderId) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM news_history WHERE reader_id = ?")
            .bind(reader_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub async fn record(&self, reader_id: ReaderId, item: &DeliveredItem) -> Result<bool> {
        Ok(self.record_all(reader_id, std::slice::from_ref(item)).await? > 0)
    }

    /// Stores every item in one transaction and returns how many were new.
    pub async fn record_all(&self, reader_id: ReaderId, items: &[DeliveredItem]) -> Result<u64> {
        let processed_at = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut inserted = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO news_history (reader_id, title, url, published_at, processed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (reader_id, url) DO NOTHING
                "#,
            )
            .bind(reader_id)
            .bind(&item.title)
            .bind(&item.url)
            .bind(item.published)
            .bind(processed_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        info!(
            "Recorded {} new history entries for reader {} ({} submitted)",
            inserted,
            reader_id,
            items.len()
        );
        Ok(inserted)
    }

    /// Latest entries across all readers, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reader_id, title, url, published_at, processed_at
            FROM news_history
            ORDER BY processed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    id: row.try_get("id")?,
                    reader_id: row.try_get("reader_id")?,
                    title: row.try_get("title")?,
                    url: row.try_get("url")?,
                    published_at: row.try_get("published_at")?,
                    processed_at: row.try_get("processed_at")?,
                })
            })
            .collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news_history")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Deletes the history of one reader, or of everyone when `reader_id` is
    /// `None`. Returns the number of removed entries.
    pub async fn clear(&self, reader_id: Option<ReaderId>) -> Result<u64> {
        let result = match reader_id {
            Some(id) => {
                sqlx::query("DELETE FROM news_history WHERE reader_id = ?")
                    .bind(id)
                    .execute(&self.db)
                    .await?
            }
            None => sqlx::query("DELETE FROM news_history").execute(&self.db).await?,
        };
        info!("Cleared {} history entries", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::store::ReaderStore;

    fn item(url: &str) -> DeliveredItem {
        DeliveredItem {
            title: format!("Title of {url}"),
            url: url.to_string(),
            published: None,
        }
    }

    async fn setup() -> Result<(HistoryLedger, ReaderId, ReaderId)> {
        let pool = database::in_memory().await?;
        let store = ReaderStore::new(pool.clone());
        let ana = store.upsert_reader("Ana", "ana@test", "").await?;
        let bo = store.upsert_reader("Bo", "bo@test", "").await?;
        Ok((HistoryLedger::new(pool), ana.id, bo.id))
    }

    #[tokio::test]
    async fn recording_twice_is_harmless() -> Result<()> {
        let (ledger, ana, _) = setup().await?;

        assert_eq!(ledger.record_all(ana, &[item("https://x/1"), item("https://x/2")]).await?, 2);
        assert_eq!(ledger.record_all(ana, &[item("https://x/1"), item("https://x/3")]).await?, 1);
        assert!(!ledger.record(ana, &item("https://x/2")).await?);

        assert_eq!(ledger.count().await?, 3);
        assert!(ledger.has_delivered(ana, "https://x/1").await?);
        assert!(!ledger.has_delivered(ana, "https://x/9").await?);
        Ok(())
    }

    #[tokio::test]
    async fn history_is_per_reader() -> Result<()> {
        let (ledger, ana, bo) = setup().await?;
        ledger.record(ana, &item("https://x/1")).await?;

        assert!(!ledger.has_delivered(bo, "https://x/1").await?);
        assert!(ledger.record(bo, &item("https://x/1")).await?);
        assert_eq!(ledger.delivered_urls(ana).await?.len(), 1);

        assert_eq!(ledger.clear(Some(ana)).await?, 1);
        assert!(ledger.has_delivered(bo, "https://x/1").await?);
        assert_eq!(ledger.clear(None).await?, 1);
        assert_eq!(ledger.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn recent_lists_newest_first() -> Result<()> {
        let (ledger, ana, _) = setup().await?;
        ledger.record(ana, &item("https://x/old")).await?;
        ledger.record(ana, &item("https://x/new")).await?;

        let entries = ledger.recent(1).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://x/new");
        assert_eq!(entries[0].reader_id, ana);
        Ok(())
    }
}
