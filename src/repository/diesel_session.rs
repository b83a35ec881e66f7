//! Diesel-based scraping session repository for SQLite.
//!
//! Sessions are written in their own short transactions, outside the import
//! transaction, so a rolled-back import still leaves an observable record.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::diesel_models::{NewScrapingSession, ScrapingSessionRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{format_datetime, parse_datetime, parse_datetime_opt};
use crate::models::{ScrapingSession, SessionStatus};
use crate::schema::scraping_sessions;

impl From<ScrapingSessionRecord> for ScrapingSession {
    fn from(record: ScrapingSessionRecord) -> Self {
        ScrapingSession {
            id: record.id,
            restaurant_id: record.restaurant_id,
            restaurant_name: record.restaurant_name,
            source: record.source,
            content_hash: record.content_hash,
            scraped_at: parse_datetime_opt(record.scraped_at),
            started_at: parse_datetime(&record.started_at),
            completed_at: parse_datetime_opt(record.completed_at),
            status: SessionStatus::from_str(&record.status).unwrap_or(SessionStatus::Failed),
            product_count: record.product_count.max(0) as u32,
            category_count: record.category_count.max(0) as u32,
            created_count: record.created_count.max(0) as u32,
            updated_count: record.updated_count.max(0) as u32,
            warnings: serde_json::from_str(&record.warnings).unwrap_or_default(),
            errors: serde_json::from_str(&record.errors).unwrap_or_default(),
            error_message: record.error_message,
        }
    }
}

/// Everything known about a session when it starts.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub id: String,
    pub restaurant_name: Option<String>,
    pub source: String,
    pub content_hash: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// Final figures written when a session completes.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub restaurant_id: Option<i32>,
    pub product_count: u32,
    pub category_count: u32,
    pub created_count: u32,
    pub updated_count: u32,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct DieselSessionRepository {
    pool: SqlitePool,
}

impl DieselSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a session in `running` state.
    pub async fn start(&self, start: SessionStart) -> Result<(), DieselError> {
        let started_at = format_datetime(&Utc::now());
        let scraped_at = start.scraped_at.as_ref().map(format_datetime);

        run_blocking(self.pool.clone(), move |conn| {
            diesel::insert_into(scraping_sessions::table)
                .values(&NewScrapingSession {
                    id: &start.id,
                    restaurant_id: None,
                    restaurant_name: start.restaurant_name.as_deref(),
                    source: &start.source,
                    content_hash: start.content_hash.as_deref(),
                    scraped_at: scraped_at.as_deref(),
                    started_at: &started_at,
                    status: SessionStatus::Running.as_str(),
                })
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Mark a session completed with its summary counts.
    pub async fn complete(&self, id: &str, outcome: SessionOutcome) -> Result<(), DieselError> {
        let id = id.to_string();
        let completed_at = format_datetime(&Utc::now());
        let warnings = serde_json::to_string(&outcome.warnings).unwrap_or_else(|_| "[]".to_string());
        let errors = serde_json::to_string(&outcome.errors).unwrap_or_else(|_| "[]".to_string());

        run_blocking(self.pool.clone(), move |conn| {
            diesel::update(scraping_sessions::table.find(&id))
                .set((
                    scraping_sessions::restaurant_id.eq(outcome.restaurant_id),
                    scraping_sessions::completed_at.eq(Some(&completed_at)),
                    scraping_sessions::status.eq(SessionStatus::Completed.as_str()),
                    scraping_sessions::product_count.eq(outcome.product_count as i32),
                    scraping_sessions::category_count.eq(outcome.category_count as i32),
                    scraping_sessions::created_count.eq(outcome.created_count as i32),
                    scraping_sessions::updated_count.eq(outcome.updated_count as i32),
                    scraping_sessions::warnings.eq(&warnings),
                    scraping_sessions::errors.eq(&errors),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Mark a session failed. Nothing from the import itself was kept.
    pub async fn fail(&self, id: &str, message: &str, errors: Vec<String>) -> Result<(), DieselError> {
        let id = id.to_string();
        let message = message.to_string();
        let completed_at = format_datetime(&Utc::now());
        let errors = serde_json::to_string(&errors).unwrap_or_else(|_| "[]".to_string());

        run_blocking(self.pool.clone(), move |conn| {
            diesel::update(scraping_sessions::table.find(&id))
                .set((
                    scraping_sessions::completed_at.eq(Some(&completed_at)),
                    scraping_sessions::status.eq(SessionStatus::Failed.as_str()),
                    scraping_sessions::errors.eq(&errors),
                    scraping_sessions::error_message.eq(Some(&message)),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScrapingSession>, DieselError> {
        let id = id.to_string();
        run_blocking(self.pool.clone(), move |conn| {
            scraping_sessions::table
                .find(&id)
                .first::<ScrapingSessionRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(ScrapingSession::from))
    }

    /// Most recent sessions first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ScrapingSession>, DieselError> {
        let limit = limit as i64;
        run_blocking(self.pool.clone(), move |conn| {
            scraping_sessions::table
                .order(scraping_sessions::started_at.desc())
                .limit(limit)
                .load::<ScrapingSessionRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(ScrapingSession::from).collect())
    }

    pub async fn for_restaurant(&self, restaurant_id: i32) -> Result<Vec<ScrapingSession>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            scraping_sessions::table
                .filter(scraping_sessions::restaurant_id.eq(restaurant_id))
                .order(scraping_sessions::started_at.asc())
                .load::<ScrapingSessionRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(ScrapingSession::from).collect())
    }

    /// Earliest completed session that imported identical content for the
    /// same restaurant.
    pub async fn find_completed_with_hash(
        &self,
        restaurant_id: i32,
        content_hash: &str,
    ) -> Result<Option<ScrapingSession>, DieselError> {
        let hash = content_hash.to_string();
        run_blocking(self.pool.clone(), move |conn| {
            scraping_sessions::table
                .filter(scraping_sessions::restaurant_id.eq(restaurant_id))
                .filter(scraping_sessions::content_hash.eq(&hash))
                .filter(scraping_sessions::status.eq(SessionStatus::Completed.as_str()))
                .order(scraping_sessions::started_at.asc())
                .first::<ScrapingSessionRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(ScrapingSession::from))
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = scraping_sessions::table.select(count_star()).first(conn)?;
            Ok(count as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::test_support::restaurant;
    use crate::repository::test_support::setup_test_db;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (pool, _dir) = setup_test_db().await;
        let (cafe, other) = {
            let mut pooled = pool.get().unwrap();
            let conn: &mut SqliteConnection = &mut pooled;
            (restaurant(conn, "Cafe", 9).restaurant_id, restaurant(conn, "Cafe Two", 9).restaurant_id)
        };
        let repo = DieselSessionRepository::new(pool);

        repo.start(SessionStart {
            id: "s-1".into(),
            restaurant_name: Some("Cafe".into()),
            source: "cafe.json".into(),
            content_hash: Some("abc".into()),
            scraped_at: None,
        })
        .await
        .unwrap();

        let running = repo.get("s-1").await.unwrap().unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert!(!running.is_finished());

        repo.complete(
            "s-1",
            SessionOutcome {
                restaurant_id: Some(cafe),
                product_count: 3,
                category_count: 1,
                warnings: vec!["w".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let done = repo.get("s-1").await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.product_count, 3);
        assert_eq!(done.warnings, vec!["w".to_string()]);
        assert!(done.completed_at.is_some());

        let dup = repo.find_completed_with_hash(cafe, "abc").await.unwrap();
        assert_eq!(dup.map(|s| s.id), Some("s-1".to_string()));
        assert!(repo.find_completed_with_hash(other, "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_session_keeps_message() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselSessionRepository::new(pool);

        repo.start(SessionStart {
            id: "s-2".into(),
            restaurant_name: None,
            source: "broken.json".into(),
            content_hash: None,
            scraped_at: None,
        })
        .await
        .unwrap();
        repo.fail("s-2", "import cancelled", vec!["boom".into()]).await.unwrap();

        let failed = repo.get("s-2").await.unwrap().unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("import cancelled"));
        assert_eq!(failed.errors, vec!["boom".to_string()]);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
