//! PostgreSQL-backed profile store.
//!
//! Documents live in the `profiles` table (see `sql/schema.sql`). The primary
//! key on `subject_id` rejects duplicate first syncs; preferences are JSONB.

use super::{ProfileDocument, ProfileStore, ProfileUpdate, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    Connection, PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};
use std::time::Duration;
use tracing::{Instrument, info_span};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));
const UNIQUE_VIOLATION: &str = "23505";

const PROFILE_COLUMNS: &str =
    "subject_id, email, display_name, photo_url, created_at, last_login_at, preferences";

#[derive(Debug, Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `dsn`, waiting at most `connect_timeout`, and apply the schema.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established in time or the
    /// schema cannot be applied.
    pub async fn connect(dsn: &str, connect_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .acquire_timeout(connect_timeout)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        let store = Self::new(pool);
        store.apply_schema().await?;
        Ok(store)
    }

    /// Create the `profiles` table if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get(&self, subject_id: &str) -> Result<Option<ProfileDocument>, StoreError> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE subject_id = $1");
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(&query)
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn insert(&self, document: &ProfileDocument) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        let result = sqlx::query(&query)
            .bind(&document.subject_id)
            .bind(&document.email)
            .bind(&document.display_name)
            .bind(&document.photo_url)
            .bind(document.created_at)
            .bind(document.last_login_at)
            .bind(document.preferences.clone().map(Json))
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::Duplicate(document.subject_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn touch_login(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProfileDocument>, StoreError> {
        let query = format!(
            r"
            UPDATE profiles
            SET last_login_at = GREATEST(last_login_at, $2)
            WHERE subject_id = $1
            RETURNING {PROFILE_COLUMNS}
            "
        );
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        let row = sqlx::query(&query)
            .bind(subject_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn update(
        &self,
        subject_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<ProfileDocument>, StoreError> {
        let query = format!(
            r"
            UPDATE profiles
            SET
                display_name = COALESCE($2, display_name),
                preferences = COALESCE($3, preferences)
            WHERE subject_id = $1
            RETURNING {PROFILE_COLUMNS}
            "
        );
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "UPDATE");
        let row = sqlx::query(&query)
            .bind(subject_id)
            .bind(&update.display_name)
            .bind(update.preferences.clone().map(Json))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}

fn profile_from_row(row: &PgRow) -> Result<ProfileDocument, StoreError> {
    let preferences: Option<Json<Map<String, Value>>> = row.try_get("preferences")?;
    Ok(ProfileDocument {
        subject_id: row.try_get("subject_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        photo_url: row.try_get("photo_url")?,
        created_at: row.try_get("created_at")?,
        last_login_at: row.try_get("last_login_at")?,
        preferences: preferences.map(|Json(map)| map),
    })
}

/// Split a schema file into executable statements, dropping `--` comments.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if trimmed.ends_with(';') {
            statements.push(current.trim().trim_end_matches(';').to_string());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }

    statements
}
