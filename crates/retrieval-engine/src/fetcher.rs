use async_trait::async_trait;
use portal_core_types::{FetchResult, PortalError, QueryKind, Record, TargetAdapter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::extract::RecordExtractor;
use crate::resolver::{MethodResolver, OperationTransport};

pub const DEFAULT_PAGE_SIZE: usize = 200;
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// One page of records at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Record>, PortalError>;

    /// Used in logs and in `EmptyResult` errors.
    fn describe(&self) -> String;
}

/// What an aggregate with no records means.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyResultPolicy {
    #[default]
    Success,
    Warn,
    Error,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PaginatedFetcher {
    empty: EmptyResultPolicy,
}

impl PaginatedFetcher {
    pub fn new(empty: EmptyResultPolicy) -> Self {
        Self { empty }
    }

    /// Pages from `offset` until a short or empty page, or until `max_records`.
    pub async fn fetch_all(
        &self,
        source: &dyn PageSource,
        offset: usize,
        page_size: usize,
        max_records: usize,
    ) -> Result<FetchResult, PortalError> {
        self.collect(source, offset, page_size, max_records, None).await
    }

    /// A single page of at most `limit` records.
    pub async fn fetch_one(
        &self,
        source: &dyn PageSource,
        offset: usize,
        limit: usize,
    ) -> Result<FetchResult, PortalError> {
        self.collect(source, offset, limit, limit, Some(1)).await
    }

    async fn collect(
        &self,
        source: &dyn PageSource,
        offset: usize,
        page_size: usize,
        max_records: usize,
        max_pages: Option<usize>,
    ) -> Result<FetchResult, PortalError> {
        if page_size == 0 || max_records == 0 {
            return Err(PortalError::QueryBuild(format!(
                "page size and record cap must be positive (got {page_size} and {max_records})"
            )));
        }

        let mut records: Vec<Record> = Vec::new();
        let mut cursor = offset;
        let mut page_count = 0;

        loop {
            if max_pages.is_some_and(|limit| page_count >= limit) {
                break;
            }
            let page = source.fetch_page(cursor, page_size).await?;
            let raw_only = !page.is_empty() && page.iter().all(Record::is_raw);
            if (page.is_empty() || raw_only) && page_count > 0 {
                // past the last rendered row there is nothing left to list
                debug!(target: "retrieval", source = %source.describe(), cursor, "listing exhausted");
                break;
            }

            page_count += 1;
            let received = page.len();
            records.extend(page);
            cursor = cursor.saturating_add(received);
            debug!(target: "retrieval", source = %source.describe(), page = page_count, received, "page fetched");

            if raw_only || received < page_size || records.len() >= max_records {
                break;
            }
        }

        let truncated = records.len() > max_records;
        if truncated {
            records.truncate(max_records);
        }

        if records.is_empty() {
            match self.empty {
                EmptyResultPolicy::Success => {}
                EmptyResultPolicy::Warn => {
                    warn!(target: "retrieval", source = %source.describe(), "query returned no records")
                }
                EmptyResultPolicy::Error => {
                    return Err(PortalError::EmptyResult(source.describe()));
                }
            }
        }

        info!(
            target: "retrieval",
            source = %source.describe(),
            total = records.len(),
            pages = page_count,
            truncated,
            "fetch complete"
        );
        Ok(FetchResult {
            total_fetched: records.len(),
            records,
            offset,
            truncated,
            page_count,
        })
    }
}

/// List pages of one table, resolved through the adapter's candidates.
pub struct ListSource<'a> {
    adapter: &'a dyn TargetAdapter,
    transport: &'a dyn OperationTransport,
    table: String,
    query: Option<String>,
    extractor: RecordExtractor,
}

impl<'a> ListSource<'a> {
    pub fn new(
        adapter: &'a dyn TargetAdapter,
        transport: &'a dyn OperationTransport,
        table: impl Into<String>,
        query: Option<String>,
    ) -> Self {
        Self {
            adapter,
            transport,
            table: table.into(),
            query: query.filter(|query| !query.trim().is_empty()),
            extractor: RecordExtractor::new(),
        }
    }
}

#[async_trait]
impl PageSource for ListSource<'_> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Record>, PortalError> {
        let kind = QueryKind::List {
            table: self.table.clone(),
            query: self.query.clone(),
            offset,
            limit,
        };
        let candidates = self.adapter.candidate_operations_for(&kind)?;
        let resolved = MethodResolver::resolve(candidates, self.transport).await?;
        let mut records = self.extractor.extract(&resolved.value);
        records.truncate(limit);
        debug!(
            target: "retrieval",
            table = %self.table,
            candidate = %resolved.which_succeeded,
            failures = resolved.failures.len(),
            rows = records.len(),
            "list page resolved"
        );
        Ok(records)
    }

    fn describe(&self) -> String {
        match &self.query {
            Some(query) => format!("{}:{}?{}", self.adapter.target().key(), self.table, query),
            None => format!("{}:{}", self.adapter.target().key(), self.table),
        }
    }
}
