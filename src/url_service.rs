use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    config::STORE_TIMEOUT,
    short_code::{CodeGenerator, ShortCode, code_generator_capsule},
    url_repo::{InsertUrlError, UrlRecord, UrlRepository, url_repository_capsule},
};

/// How many freshly generated short codes are tried before giving up.
pub const SHORTEN_ATTEMPTS: usize = 10;

#[derive(Deserialize)]
pub struct ShortenPayload {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ShortenedUrl {
    pub original_url: String,
    pub short_code: String,
}

#[derive(Debug)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct UrlSummary {
    pub original_url: String,
    pub short_code: String,
    pub clicks: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_accessed: Option<OffsetDateTime>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_urls: u64,
    pub total_clicks: u64,
}

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let code_generator = Arc::clone(get.as_ref(code_generator_capsule));
    Arc::new(UrlServiceImpl {
        url_repo,
        code_generator,
        store_timeout: STORE_TIMEOUT,
    })
}

#[async_trait]
pub trait UrlService: Send + Sync {
    /// Returns the short code for `original_url`, minting one only if the URL
    /// has never been shortened before.
    async fn shorten(
        &self,
        original_url: &str,
    ) -> Result<(ShortenedUrl, UrlCreationStatus), ShortenError>;

    /// Looks up the original URL behind `short_code` and counts the visit.
    async fn resolve(&self, short_code: &str) -> Result<Redirect, ResolveError>;

    async fn list_urls(&self) -> Result<Vec<UrlSummary>, StoreUnavailable>;

    async fn stats(&self) -> Result<Stats, StoreUnavailable>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum UrlCreationStatus {
    NewlyCreated,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("no URL was provided")]
    MissingUrl,
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not find a free short code after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
}

#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreUnavailable(pub anyhow::Error);

struct UrlServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    code_generator: Arc<dyn CodeGenerator>,
    store_timeout: Duration,
}

impl UrlServiceImpl {
    /// Gives up on a store call that has not answered within `store_timeout`.
    async fn bounded<T>(&self, store_call: impl Future<Output = T> + Send) -> anyhow::Result<T> {
        tokio::time::timeout(self.store_timeout, store_call)
            .await
            .with_context(|| format!("Store did not answer within {:?}", self.store_timeout))
    }
}

#[async_trait]
impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    async fn shorten(
        &self,
        original_url: &str,
    ) -> Result<(ShortenedUrl, UrlCreationStatus), ShortenError> {
        let original_url = original_url.trim();
        if original_url.is_empty() {
            return Err(ShortenError::MissingUrl);
        }
        // NOTE: we only validate; the URL is stored exactly as given so that
        // resolving hands back the same string
        if !Url::parse(original_url)?.has_host() {
            return Err(ShortenError::InvalidUrl(url::ParseError::EmptyHost));
        }

        if let Some(existing) = self
            .bounded(self.url_repo.find_by_original_url(original_url))
            .await
            .map_err(ShortenError::StoreUnavailable)?
            .map_err(ShortenError::StoreUnavailable)?
        {
            return Ok((existing.into(), UrlCreationStatus::AlreadyExists));
        }

        for attempt in 1..=SHORTEN_ATTEMPTS {
            let short_code = self.code_generator.generate();
            let to_insert = UrlRecord::new(
                short_code.clone(),
                original_url.to_owned(),
                OffsetDateTime::now_utc(),
            );

            match self
                .bounded(self.url_repo.insert_url(to_insert))
                .await
                .map_err(ShortenError::StoreUnavailable)?
            {
                Ok(inserted) => return Ok((inserted.into(), UrlCreationStatus::NewlyCreated)),
                Err(InsertUrlError::DuplicateUrl(existing)) => {
                    info!(
                        short_code = %existing.short_code,
                        "URL was concurrently shortened by another request"
                    );
                    return Ok((existing.into(), UrlCreationStatus::AlreadyExists));
                }
                Err(InsertUrlError::Internal(err)) => {
                    return Err(ShortenError::StoreUnavailable(
                        err.context("Failed to save newly shortened URL"),
                    ));
                }
                Err(InsertUrlError::DuplicateCode) => {
                    warn!(%short_code, attempt, "Generated short code that was already taken");
                }
            }
        }

        Err(ShortenError::GenerationExhausted {
            attempts: SHORTEN_ATTEMPTS,
        })
    }

    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Result<Redirect, ResolveError> {
        let Ok(short_code) = ShortCode::new(short_code.to_owned()) else {
            return Err(ResolveError::NotFound);
        };

        let visited = self
            .bounded(
                self.url_repo
                    .record_visit(short_code.as_str(), OffsetDateTime::now_utc()),
            )
            .await
            .map_err(ResolveError::StoreUnavailable)?
            .map_err(ResolveError::StoreUnavailable)?
            .ok_or(ResolveError::NotFound)?;

        Ok(Redirect {
            url: visited.original_url,
        })
    }

    #[instrument(skip(self))]
    async fn list_urls(&self) -> Result<Vec<UrlSummary>, StoreUnavailable> {
        let urls = self
            .bounded(self.url_repo.list_urls())
            .await
            .map_err(StoreUnavailable)?
            .map_err(StoreUnavailable)?;
        Ok(urls.into_iter().map(UrlSummary::from).collect())
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> Result<Stats, StoreUnavailable> {
        Ok(Stats {
            total_urls: self
                .bounded(self.url_repo.count_urls())
                .await
                .map_err(StoreUnavailable)?
                .map_err(StoreUnavailable)?,
            total_clicks: self
                .bounded(self.url_repo.sum_clicks())
                .await
                .map_err(StoreUnavailable)?
                .map_err(StoreUnavailable)?,
        })
    }
}

impl From<UrlRecord> for ShortenedUrl {
    fn from(
        UrlRecord {
            short_code,
            original_url,
            ..
        }: UrlRecord,
    ) -> Self {
        Self {
            original_url,
            short_code: short_code.into_inner(),
        }
    }
}

impl From<UrlRecord> for UrlSummary {
    fn from(
        UrlRecord {
            short_code,
            original_url,
            clicks,
            created_at,
            last_accessed,
        }: UrlRecord,
    ) -> Self {
        Self {
            original_url,
            short_code: short_code.into_inner(),
            clicks,
            created_at,
            last_accessed,
        }
    }
}
