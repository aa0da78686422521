use crate::types::{DigestError, Result};
use crate::utils::url::is_valid_feed_url;
use interfaces::{Interest, Reader, ReaderId, Source};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

/// A reader with the counts shown by the `readers` command.
#[derive(Debug, Clone)]
pub struct ReaderSummary {
    pub reader: Reader,
    pub source_count: i64,
    pub topics: Vec<String>,
}

/// Reader configuration: who gets a digest, from which feeds, about what.
#[derive(Clone)]
pub struct ReaderStore {
    db: SqlitePool,
}

impl ReaderStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Creates the reader, or updates name and device address of the reader
    /// already registered under `email`.
    pub async fn upsert_reader(&self, name: &str, email: &str, device_email: &str) -> Result<Reader> {
        sqlx::query(
            r#"
            INSERT INTO readers (name, email, device_email, is_active)
            VALUES (?, ?, ?, 1)
            ON CONFLICT (email) DO UPDATE SET name = excluded.name, device_email = excluded.device_email
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(device_email)
        .execute(&self.db)
        .await?;

        let row = sqlx::query("SELECT * FROM readers WHERE email = ?")
            .bind(email)
            .fetch_one(&self.db)
            .await?;
        let reader = reader_from_row(&row)?;
        info!("Reader {} ({}) saved", reader.id, reader.email);
        Ok(reader)
    }

    pub async fn get_reader(&self, id: ReaderId) -> Result<Reader> {
        let row = sqlx::query("SELECT * FROM readers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => reader_from_row(&row),
            None => Err(DigestError::ReaderNotFound { id }),
        }
    }

    pub async fn list_active_readers(&self) -> Result<Vec<Reader>> {
        let rows = sqlx::query("SELECT * FROM readers WHERE is_active = 1 ORDER BY id")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(reader_from_row).collect()
    }

    pub async fn set_reader_active(&self, id: ReaderId, is_active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE readers SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DigestError::ReaderNotFound { id });
        }
        Ok(())
    }

    /// Adds a feed for the reader. Returns false when the reader already has
    /// a source with this URL.
    pub async fn add_source(&self, reader_id: ReaderId, name: &str, url: &str) -> Result<bool> {
        let url = url.trim();
        if !is_valid_feed_url(url) {
            return Err(DigestError::General(format!("Feed URL must be http(s): {}", url)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO sources (reader_id, name, url, is_active)
            VALUES (?, ?, ?, 1)
            ON CONFLICT (reader_id, url) DO NOTHING
            "#,
        )
        .bind(reader_id)
        .bind(name.trim())
        .bind(url)
        .execute(&self.db)
        .await?;

        let added = result.rows_affected() > 0;
        if added {
            info!("Added source {} for reader {}", name, reader_id);
        } else {
            debug!("Reader {} already has source {}", reader_id, url);
        }
        Ok(added)
    }

    /// Active sources in the order they were configured.
    pub async fn active_sources(&self, reader_id: ReaderId) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT name, url, is_active FROM sources WHERE reader_id = ? AND is_active = 1 ORDER BY id",
        )
        .bind(reader_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Source {
                    name: row.try_get("name")?,
                    feed_url: row.try_get("url")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    pub async fn replace_interests(&self, reader_id: ReaderId, keywords: &[String]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM interests WHERE reader_id = ?")
            .bind(reader_id)
            .execute(&mut *tx)
            .await?;

        for keyword in keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            sqlx::query("INSERT INTO interests (reader_id, keyword) VALUES (?, ?)")
                .bind(reader_id)
                .bind(keyword)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!("Stored {} interests for reader {}", keywords.len(), reader_id);
        Ok(())
    }

    pub async fn interests(&self, reader_id: ReaderId) -> Result<Vec<Interest>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT keyword FROM interests WHERE reader_id = ? ORDER BY id")
                .bind(reader_id)
                .fetch_all(&self.db)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(keyword,)| Interest { reader_id, keyword })
            .collect())
    }

    pub async fn reader_summary(&self) -> Result<Vec<ReaderSummary>> {
        let rows = sqlx::query("SELECT * FROM readers ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let reader = reader_from_row(&row)?;
            let (source_count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM sources WHERE reader_id = ?")
                    .bind(reader.id)
                    .fetch_one(&self.db)
                    .await?;
            let topics = self
                .interests(reader.id)
                .await?
                .into_iter()
                .map(|interest| interest.keyword)
                .collect();
            summaries.push(ReaderSummary {
                reader,
                source_count,
                topics,
            });
        }
        Ok(summaries)
    }
}

fn reader_from_row(row: &SqliteRow) -> Result<Reader> {
    Ok(Reader {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        device_email: row.try_get("device_email")?,
        is_active: row.try_get("is_active")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;

    #[tokio::test]
    async fn upsert_keeps_one_reader_per_email() -> Result<()> {
        let store = ReaderStore::new(database::in_memory().await?);

        let first = store.upsert_reader("Ana", "ana@test", "ana@kindle.test").await?;
        let second = store.upsert_reader("Ana R.", "ana@test", "new@kindle.test").await?;

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Ana R.");
        assert_eq!(store.get_reader(first.id).await?.device_email, "new@kindle.test");
        assert!(matches!(
            store.get_reader(999).await,
            Err(DigestError::ReaderNotFound { id: 999 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sources_are_unique_per_reader_and_ordered() -> Result<()> {
        let store = ReaderStore::new(database::in_memory().await?);
        let reader = store.upsert_reader("Ana", "ana@test", "").await?;

        assert!(store.add_source(reader.id, "BBC", "https://bbc.test/rss").await?);
        assert!(store.add_source(reader.id, "NYT", "https://nyt.test/rss").await?);
        assert!(!store.add_source(reader.id, "BBC again", "https://bbc.test/rss").await?);
        assert!(store.add_source(reader.id, "Bad", "not a url").await.is_err());

        let names: Vec<String> = store
            .active_sources(reader.id)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["BBC", "NYT"]);
        Ok(())
    }

    #[tokio::test]
    async fn interests_are_replaced_and_summarised() -> Result<()> {
        let store = ReaderStore::new(database::in_memory().await?);
        let reader = store.upsert_reader("Ana", "ana@test", "").await?;
        store.add_source(reader.id, "BBC", "https://bbc.test/rss").await?;

        store
            .replace_interests(reader.id, &["AI".into(), "Climate".into()])
            .await?;
        store
            .replace_interests(reader.id, &["Rust".into(), " ".into()])
            .await?;
        let interests = store.interests(reader.id).await?;
        assert_eq!(interests.len(), 1);
        assert_eq!(interests[0].keyword, "Rust");
        assert_eq!(interests[0].reader_id, reader.id);

        store.set_reader_active(reader.id, false).await?;
        assert!(store.list_active_readers().await?.is_empty());

        let summary = store.reader_summary().await?;
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].source_count, 1);
        assert_eq!(summary[0].topics, vec!["Rust"]);
        Ok(())
    }
}
