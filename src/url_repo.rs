use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbConn, EntityTrait, ExprTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, sea_query::Expr,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::{config::db_conn_capsule, orm::short_url, short_code::ShortCode};

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRecord {
    pub short_code: ShortCode,
    pub original_url: String,
    pub clicks: u64,
    pub created_at: OffsetDateTime,
    pub last_accessed: Option<OffsetDateTime>,
}

impl UrlRecord {
    /// A record that has never been visited.
    #[must_use]
    pub const fn new(short_code: ShortCode, original_url: String, created_at: OffsetDateTime) -> Self {
        Self {
            short_code,
            original_url,
            clicks: 0,
            created_at,
            last_accessed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InsertUrlError {
    #[error("short code is already taken")]
    DuplicateCode,
    #[error("original URL has already been shortened")]
    DuplicateUrl(UrlRecord),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn find_by_original_url(&self, original_url: &str) -> anyhow::Result<Option<UrlRecord>>;

    async fn find_by_short_code(&self, short_code: &str) -> anyhow::Result<Option<UrlRecord>>;

    /// Inserts the [`UrlRecord`], relying on the database's unique constraints on both
    /// the short code and the original URL's digest. Nothing is persisted when this fails.
    async fn insert_url(&self, url: UrlRecord) -> Result<UrlRecord, InsertUrlError>;

    /// Atomically bumps the click count of `short_code` and stamps its last access,
    /// handing back the updated record. Returns [`None`] when no such short code exists.
    async fn record_visit(
        &self,
        short_code: &str,
        accessed_at: OffsetDateTime,
    ) -> anyhow::Result<Option<UrlRecord>>;

    /// All records, newest first.
    async fn list_urls(&self) -> anyhow::Result<Vec<UrlRecord>>;

    async fn count_urls(&self) -> anyhow::Result<u64>;

    async fn sum_clicks(&self) -> anyhow::Result<u64>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

/// Fixed-width key for `original_url`, which is too long to index directly.
fn original_url_hash(original_url: &str) -> String {
    blake3::hash(original_url.as_bytes()).to_hex().to_string()
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn find_by_original_url(&self, original_url: &str) -> anyhow::Result<Option<UrlRecord>> {
        short_url::Entity::find()
            .filter(short_url::Column::OriginalUrlHash.eq(original_url_hash(original_url)))
            .filter(short_url::Column::OriginalUrl.eq(original_url))
            .one(&self.db)
            .await
            .context("Failed to look up URL by original URL")?
            .map(UrlRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_short_code(&self, short_code: &str) -> anyhow::Result<Option<UrlRecord>> {
        short_url::Entity::find_by_id(short_code)
            .one(&self.db)
            .await
            .context("Failed to look up URL by short code")?
            .map(UrlRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn insert_url(&self, url: UrlRecord) -> Result<UrlRecord, InsertUrlError> {
        let original_url = url.original_url.clone();
        let to_insert = short_url::ActiveModel {
            short_code: Set(url.short_code.into_inner()),
            original_url_hash: Set(original_url_hash(&url.original_url)),
            original_url: Set(url.original_url),
            clicks: Set(i64::try_from(url.clicks)
                .context("Click count does not fit in the database")
                .map_err(InsertUrlError::Internal)?),
            created_at: Set(url.created_at),
            last_accessed: Set(url.last_accessed),
        };

        match to_insert.insert(&self.db).await {
            Ok(inserted) => UrlRecord::try_from(inserted).map_err(InsertUrlError::Internal),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // NOTE: either constraint may have fired; an existing row for this URL
                // means it was the original URL's, otherwise the short code clashed
                warn!(?err, "Insert hit a unique constraint");
                match self
                    .find_by_original_url(&original_url)
                    .await
                    .map_err(InsertUrlError::Internal)?
                {
                    Some(existing) => Err(InsertUrlError::DuplicateUrl(existing)),
                    None => Err(InsertUrlError::DuplicateCode),
                }
            }
            Err(err) => Err(InsertUrlError::Internal(
                anyhow::Error::new(err).context("Failed to insert URL"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn record_visit(
        &self,
        short_code: &str,
        accessed_at: OffsetDateTime,
    ) -> anyhow::Result<Option<UrlRecord>> {
        let last_accessed = Expr::col(short_url::Column::LastAccessed);
        short_url::Entity::update_many()
            .col_expr(
                short_url::Column::Clicks,
                Expr::col(short_url::Column::Clicks).add(1_i64),
            )
            // NOTE: concurrent visits may commit out of order; last_accessed only moves forward
            .col_expr(
                short_url::Column::LastAccessed,
                Expr::case(
                    last_accessed
                        .clone()
                        .is_null()
                        .or(last_accessed.clone().lt(accessed_at)),
                    accessed_at,
                )
                .finally(last_accessed)
                .into(),
            )
            .filter(short_url::Column::ShortCode.eq(short_code))
            .exec_with_returning(&self.db)
            .await
            .context("Failed to record visit")?
            .into_iter()
            .next()
            .map(UrlRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_urls(&self) -> anyhow::Result<Vec<UrlRecord>> {
        short_url::Entity::find()
            .order_by_desc(short_url::Column::CreatedAt)
            .all(&self.db)
            .await
            .context("Failed to list URLs")?
            .into_iter()
            .map(UrlRecord::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn count_urls(&self) -> anyhow::Result<u64> {
        short_url::Entity::find()
            .count(&self.db)
            .await
            .context("Failed to count URLs")
    }

    #[instrument(skip(self))]
    async fn sum_clicks(&self) -> anyhow::Result<u64> {
        // NOTE: SUM over BIGINT is NUMERIC on Postgres, so cast it back
        let total_clicks: Option<i64> = short_url::Entity::find()
            .select_only()
            .column_as(
                Expr::cust("CAST(COALESCE(SUM(clicks), 0) AS BIGINT)"),
                "total_clicks",
            )
            .into_tuple()
            .one(&self.db)
            .await
            .context("Failed to sum clicks")?;
        u64::try_from(total_clicks.unwrap_or(0)).context("Click total is negative")
    }
}

impl TryFrom<short_url::Model> for UrlRecord {
    type Error = anyhow::Error;

    fn try_from(
        short_url::Model {
            short_code,
            original_url,
            clicks,
            created_at,
            last_accessed,
            ..
        }: short_url::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            short_code: ShortCode::new(short_code).context("Stored short code is invalid")?,
            original_url,
            clicks: u64::try_from(clicks).context("Stored click count is negative")?,
            created_at,
            last_accessed,
        })
    }
}
