//! Tool-facing facade: one method per tool call, every error a [`ToolError`].

use std::collections::HashMap;
use std::sync::Arc;

use cdp_adapter::{ChromiumLauncher, PageLauncher};
use portal_core_types::{FetchResult, FilterSpec, PortalError, QueryKind, Record, TargetIdentity};
use prometheus::Registry;
use retrieval_engine::{
    BrowserOperationTransport, EmptyResultPolicy, ListSource, MethodResolver, PaginatedFetcher,
    QueryBuilder, RecordExtractor, Resolved,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session_center::{
    InteractionChannel, SessionGuard, SessionManager, SessionRecord, TerminalPrompt,
};
use target_adapters::servicenow::{CHANGE_TABLE, DESCRIBE_LIMIT, DICTIONARY_TABLE, INCIDENT_TABLE};
use target_adapters::{
    AdapterKind, ChangeQuery, IncidentQuery, IntentOutcome, PanoramaDirect, PortalAdapter,
    ServiceNowAdapter, TableDescription,
};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::errors::ToolError;
use crate::telemetry;

/// Arguments of a table query.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableQuery {
    /// Target address; may be empty when exactly one target is configured.
    pub target: String,
    pub table: String,
    pub filters: Vec<FilterSpec>,
    /// `AND` (default) or `OR`.
    pub join: String,
    /// Pre-encoded query, used only when `filters` is empty.
    pub query: Option<String>,
    pub offset: usize,
    /// Single-page size; the configured page size when unset.
    pub limit: Option<usize>,
    /// Follow pages until exhaustion or `max_records`.
    pub fetch_all: bool,
    pub max_records: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TargetSummary {
    pub target: String,
    pub kind: AdapterKind,
    pub landing_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub target: String,
    pub authenticated: bool,
    pub session: Option<SessionRecord>,
}

pub struct PortalService {
    config: BridgeConfig,
    sessions: SessionManager,
    adapters: HashMap<TargetIdentity, PortalAdapter>,
    queries: QueryBuilder,
    fetcher: PaginatedFetcher,
    registry: Registry,
}

impl PortalService {
    /// Real Chromium, terminal prompt when `session.interactive` is set.
    pub fn from_config(config: BridgeConfig) -> Result<Self, ToolError> {
        let launcher = Arc::new(ChromiumLauncher::new(config.cdp_config()));
        let interaction: Option<Arc<dyn InteractionChannel>> = if config.session.interactive {
            Some(Arc::new(TerminalPrompt))
        } else {
            None
        };
        Self::new(config, launcher, interaction)
    }

    pub fn new(
        config: BridgeConfig,
        launcher: Arc<dyn PageLauncher>,
        interaction: Option<Arc<dyn InteractionChannel>>,
    ) -> Result<Self, ToolError> {
        config.validate()?;
        let mut sessions =
            SessionManager::new(launcher, config.credential_store(), config.session_policy());
        if let Some(channel) = interaction {
            sessions = sessions.with_interaction(channel);
        }

        let mut adapters = HashMap::new();
        for target in &config.targets {
            let identity = target.identity()?;
            let adapter = PortalAdapter::for_target(identity.clone(), target.kind)?;
            sessions.register(adapter.shared(), config.sso_account_for(target));
            if adapters.insert(identity.clone(), adapter).is_some() {
                warn!(target: "portal-bridge", target_key = %identity.key(), "target listed twice; keeping the last entry");
            }
        }
        info!(target: "portal-bridge", targets = adapters.len(), "portal service ready");

        Ok(Self {
            queries: QueryBuilder::new(config.query.strict_operators),
            fetcher: PaginatedFetcher::new(config.query.empty_results),
            registry: telemetry::metrics_registry(),
            config,
            sessions,
            adapters,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn targets(&self) -> Vec<TargetSummary> {
        let mut targets: Vec<TargetSummary> = self
            .adapters
            .values()
            .map(|adapter| TargetSummary {
                target: adapter.target().key(),
                kind: adapter.kind(),
                landing_url: adapter.shared().landing_url(),
            })
            .collect();
        targets.sort_by(|a, b| a.target.cmp(&b.target));
        targets
    }

    pub async fn query_table(&self, request: TableQuery) -> Result<FetchResult, ToolError> {
        let adapter = self.adapter(&request.target)?;
        if request.table.trim().is_empty() {
            return Err(ToolError::invalid_argument("table is required"));
        }
        let query = if request.filters.is_empty() {
            request.query.clone()
        } else {
            Some(self.queries.build_specs(&request.filters, &request.join)?)
        };

        let guard = self.acquire(adapter).await?;
        let transport = BrowserOperationTransport::new(guard.page());
        let shared = adapter.shared();
        let source = ListSource::new(shared.as_ref(), &transport, request.table.trim(), query);
        let result = if request.fetch_all {
            let max_records = request.max_records.unwrap_or(self.config.query.max_records);
            let page_size = request.limit.unwrap_or(self.config.query.page_size);
            self.fetcher
                .fetch_all(&source, request.offset, page_size, max_records)
                .await?
        } else {
            let limit = request.limit.unwrap_or(self.config.query.page_size);
            self.fetcher.fetch_one(&source, request.offset, limit).await?
        };
        Ok(result)
    }

    /// Encoded query for `filters`, without touching a target.
    pub fn build_query(&self, filters: &[FilterSpec], join: &str) -> Result<String, ToolError> {
        Ok(self.queries.build_specs(filters, join)?)
    }

    /// Incidents by group, state word and priority, one page.
    pub async fn query_incidents(
        &self,
        target: &str,
        request: IncidentQuery,
    ) -> Result<FetchResult, ToolError> {
        let query = request.encoded()?;
        self.query_servicenow("query_incidents", target, INCIDENT_TABLE, query, request.limit())
            .await
    }

    /// Change requests by type and state, one page.
    pub async fn query_changes(
        &self,
        target: &str,
        request: ChangeQuery,
    ) -> Result<FetchResult, ToolError> {
        let query = request.encoded()?;
        self.query_servicenow("query_changes", target, CHANGE_TABLE, query, request.limit())
            .await
    }

    /// One record by system id or human-readable number.
    pub async fn get_record(
        &self,
        target: &str,
        table: &str,
        identifier: &str,
    ) -> Result<Resolved<Record>, ToolError> {
        let adapter = self.adapter(target)?;
        let kind = QueryKind::Record {
            table: table.trim().to_string(),
            identifier: identifier.trim().to_string(),
        };
        let candidates = adapter.shared().candidate_operations_for(&kind)?;

        let guard = self.acquire(adapter).await?;
        let transport = BrowserOperationTransport::new(guard.page());
        let resolved = MethodResolver::resolve(candidates, &transport).await?;
        let extractor = RecordExtractor::new();
        Ok(resolved.map(|observation| {
            extractor
                .extract(&observation)
                .into_iter()
                .next()
                .unwrap_or_default()
        }))
    }

    pub async fn search_knowledge(
        &self,
        target: &str,
        text: &str,
        limit: usize,
    ) -> Result<Resolved<Vec<Record>>, ToolError> {
        let adapter = self.adapter(target)?;
        if limit == 0 {
            return Err(ToolError::invalid_argument("limit must be positive"));
        }
        let kind = QueryKind::Search {
            text: text.to_string(),
            limit,
        };
        let candidates = adapter.shared().candidate_operations_for(&kind)?;

        let guard = self.acquire(adapter).await?;
        let transport = BrowserOperationTransport::new(guard.page());
        let resolved = MethodResolver::resolve(candidates, &transport).await?;
        let extractor = RecordExtractor::new();
        Ok(resolved.map(|observation| {
            let mut records = extractor.extract(&observation);
            records.truncate(limit);
            records
        }))
    }

    /// Column names, labels and types of a ServiceNow table.
    pub async fn describe_table(
        &self,
        target: &str,
        table: &str,
    ) -> Result<TableDescription, ToolError> {
        let adapter = self.adapter(target)?;
        if adapter.as_servicenow().is_none() {
            return Err(not_supported("describe_table", adapter));
        }
        let table = table.trim();
        let query = ServiceNowAdapter::describe_query(table)?;

        let guard = self.acquire(adapter).await?;
        let transport = BrowserOperationTransport::new(guard.page());
        let shared = adapter.shared();
        let source = ListSource::new(shared.as_ref(), &transport, DICTIONARY_TABLE, Some(query));
        let rows = PaginatedFetcher::new(EmptyResultPolicy::Success)
            .fetch_one(&source, 0, DESCRIBE_LIMIT)
            .await?;
        Ok(ServiceNowAdapter::describe_fields(table, &rows.records))
    }

    /// Named Panorama request (`system_info`, `policies`, `logs`, ...).
    pub async fn intent(
        &self,
        target: &str,
        name: &str,
        params: Value,
    ) -> Result<IntentOutcome, ToolError> {
        let adapter = self.adapter(target)?;
        let Some(panorama) = adapter.as_panorama() else {
            return Err(not_supported("intent", adapter));
        };

        let guard = self.acquire(adapter).await?;
        let transport = BrowserOperationTransport::new(guard.page());
        let outcome = PanoramaDirect::new(panorama, &transport)
            .intent(name, &params)
            .await?;
        Ok(outcome)
    }

    pub async fn check_status(&self, target: &str) -> Result<StatusReport, ToolError> {
        let adapter = self.adapter(target)?;
        let identity = adapter.target();
        let authenticated = self.sessions.check_status(identity).await?;
        let session = self
            .sessions
            .sessions()
            .into_iter()
            .find(|record| &record.target == identity);
        Ok(StatusReport {
            target: identity.key(),
            authenticated,
            session,
        })
    }

    /// Forgets the session and its saved credential. Idempotent.
    pub async fn logout(&self, target: &str) -> Result<(), ToolError> {
        let adapter = self.adapter(target)?;
        self.sessions.logout(adapter.target()).await?;
        Ok(())
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions.sessions()
    }

    pub fn metrics_text(&self) -> String {
        telemetry::render_metrics(&self.registry)
    }

    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }

    fn adapter(&self, target: &str) -> Result<&PortalAdapter, PortalError> {
        if target.trim().is_empty() {
            let mut only = self.adapters.values();
            return match (only.next(), only.next()) {
                (Some(adapter), None) => Ok(adapter),
                _ => Err(PortalError::QueryBuild(
                    "target is required when more than one is configured".into(),
                )),
            };
        }
        let identity = TargetIdentity::parse(target)?;
        self.adapters
            .get(&identity)
            .ok_or_else(|| PortalError::UnknownTarget(identity.key()))
    }

    async fn query_servicenow(
        &self,
        operation: &str,
        target: &str,
        table: &str,
        query: Option<String>,
        limit: usize,
    ) -> Result<FetchResult, ToolError> {
        let adapter = self.adapter(target)?;
        if adapter.as_servicenow().is_none() {
            return Err(not_supported(operation, adapter));
        }
        if limit == 0 {
            return Err(ToolError::invalid_argument("limit must be positive"));
        }
        self.query_table(TableQuery {
            target: target.to_string(),
            table: table.to_string(),
            query,
            limit: Some(limit),
            ..TableQuery::default()
        })
        .await
    }

    async fn acquire(&self, adapter: &PortalAdapter) -> Result<SessionGuard, PortalError> {
        let handle = self.sessions.ensure_authenticated(adapter.target()).await?;
        handle.acquire().await
    }
}

fn not_supported(operation: &str, adapter: &PortalAdapter) -> ToolError {
    ToolError::invalid_argument(format!(
        "{operation} is not available for {} target {}",
        adapter.kind(),
        adapter.target().key()
    ))
}
