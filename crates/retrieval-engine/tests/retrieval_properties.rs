use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::mock::ScriptedPage;
use portal_core_types::adapter::default_idp_indicators;
use portal_core_types::{
    CandidateOperation, CaptureLayout, LoginAffordances, NavProbe, OperationCall, PageCall,
    PortalError, QueryKind, Record, ScriptCall, TableLayout, TargetAdapter, TargetIdentity,
};
use retrieval_engine::{
    BrowserOperationTransport, ListSource, MethodResolver, Observation, OperationTransport,
    PageSource, PaginatedFetcher, DEFAULT_MAX_RECORDS,
};
use serde_json::{json, Value};

struct FixedPages(Vec<usize>);

#[async_trait]
impl PageSource for FixedPages {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<Record>, PortalError> {
        let index = offset / limit;
        let size = self.0.get(index).copied().unwrap_or(0);
        Ok((0..size)
            .map(|i| [("number", format!("INC{:07}", offset + i))].into_iter().collect())
            .collect())
    }

    fn describe(&self) -> String {
        "fixed".into()
    }
}

#[tokio::test]
async fn four_pages_are_fetched_to_exhaustion() {
    let result = PaginatedFetcher::default()
        .fetch_all(&FixedPages(vec![200, 200, 200, 50]), 0, 200, DEFAULT_MAX_RECORDS)
        .await
        .unwrap();
    assert_eq!(result.total_fetched, 650);
    assert_eq!(result.records.len(), 650);
    assert!(!result.truncated);
    assert_eq!(result.page_count, 4);
}

#[tokio::test]
async fn record_cap_clips_and_flags_truncation() {
    let result = PaginatedFetcher::default()
        .fetch_all(&FixedPages(vec![200, 200, 200, 50]), 0, 200, 450)
        .await
        .unwrap();
    assert_eq!(result.total_fetched, 450);
    assert!(result.truncated);
    assert_eq!(result.page_count, 3);
    assert_eq!(result.records.last().unwrap().get("number"), Some("INC0000449"));
}

struct Outcomes(Vec<(&'static str, bool)>);

#[async_trait]
impl OperationTransport for Outcomes {
    async fn execute(&self, candidate: &CandidateOperation) -> Result<Observation, PortalError> {
        let ok = self
            .0
            .iter()
            .find(|(name, _)| *name == candidate.name)
            .map(|(_, ok)| *ok)
            .unwrap_or(false);
        if ok {
            Ok(Observation::Json(json!({ "winner": candidate.name })))
        } else {
            Err(PortalError::Operation(format!("{} failed", candidate.name)))
        }
    }
}

fn script(name: &str, priority: u32) -> CandidateOperation {
    CandidateOperation::new(
        name,
        priority,
        OperationCall::Script(ScriptCall::new("() => null", Value::Null)),
    )
}

#[tokio::test]
async fn second_candidate_wins_after_first_fails() {
    let resolved = MethodResolver::resolve(
        vec![script("A", 0), script("B", 1)],
        &Outcomes(vec![("A", false), ("B", true)]),
    )
    .await
    .unwrap();
    assert_eq!(resolved.which_succeeded, "B");
    assert_eq!(resolved.value, Observation::Json(json!({ "winner": "B" })));
    assert_eq!(resolved.failures.len(), 1);
}

#[tokio::test]
async fn all_candidates_failing_is_exhaustion() {
    let err = MethodResolver::resolve(
        vec![script("A", 0), script("B", 1)],
        &Outcomes(vec![("A", false), ("B", false)]),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        PortalError::OperationExhausted { attempts: 2, ref last_error, .. } if last_error.contains("B failed")
    ));
}

struct Catalog {
    target: TargetIdentity,
    login: LoginAffordances,
    nav: NavProbe,
    idp: Vec<String>,
}

impl Catalog {
    fn new() -> Self {
        Self {
            target: TargetIdentity::parse("https://cmdb.acme.example").unwrap(),
            login: LoginAffordances::default(),
            nav: NavProbe::default(),
            idp: default_idp_indicators(),
        }
    }
}

impl TargetAdapter for Catalog {
    fn kind(&self) -> &'static str {
        "catalog"
    }
    fn target(&self) -> &TargetIdentity {
        &self.target
    }
    fn landing_url(&self) -> String {
        self.target.url_for("/")
    }
    fn login_affordances(&self) -> &LoginAffordances {
        &self.login
    }
    fn nav_affordance_probe(&self) -> &NavProbe {
        &self.nav
    }
    fn idp_indicators(&self) -> &[String] {
        &self.idp
    }
    fn candidate_operations_for(
        &self,
        kind: &QueryKind,
    ) -> Result<Vec<CandidateOperation>, PortalError> {
        let QueryKind::List { table, offset, limit, .. } = kind else {
            return Err(PortalError::QueryBuild(format!("{} not supported", kind.label())));
        };
        let capture = CaptureLayout {
            table: Some(TableLayout {
                table: "table.list".into(),
                header_row: "thead tr".into(),
                rows: "tbody tr".into(),
            }),
            ..CaptureLayout::default()
        };
        let url = self
            .target
            .url_for(&format!("/{table}_list.do?first={offset}&rows={limit}"));
        Ok(vec![CandidateOperation::new(
            "list_page",
            0,
            OperationCall::Page(PageCall::new(url, capture)),
        )])
    }
}

#[tokio::test(start_paused = true)]
async fn list_source_extracts_rows_and_stops_on_empty_page() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    let page = Arc::new(
        ScriptedPage::logged_in("https://cmdb.acme.example/").with_evaluator(move |_source, args| {
            assert!(args.pointer("/table/table").is_some(), "capture layout was not forwarded");
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                return Ok(json!({
                    "url": "https://cmdb.acme.example/cmdb_ci_list.do",
                    "text": "No records to display",
                    "table": {"headers": ["", "Name", "Class"], "rows": []}
                }));
            }
            Ok(json!({
                "url": "https://cmdb.acme.example/cmdb_ci_list.do",
                "table": {
                    "headers": ["", "Name", "Class"],
                    "rows": [
                        [{"text": "", "href": "cmdb_ci.do?sys_id=0123456789abcdef0123456789abcdef"},
                         {"text": "web01"}, {"text": "Server"}],
                        [{"text": "", "href": "cmdb_ci.do?sys_id=fedcba9876543210fedcba9876543210"},
                         {"text": "db01"}, {"text": "Database"}]
                    ]
                }
            }))
        }),
    );
    let adapter = Catalog::new();
    let transport = BrowserOperationTransport::new(page.clone());
    let source = ListSource::new(&adapter, &transport, "cmdb_ci", Some("nameLIKE01".into()));

    let result = PaginatedFetcher::default()
        .fetch_all(&source, 0, 2, 10)
        .await
        .unwrap();

    assert_eq!(source.describe(), "cmdb.acme.example:cmdb_ci?nameLIKE01");
    assert_eq!(result.page_count, 2);
    assert_eq!(result.total_fetched, 4);
    assert_eq!(result.records[0].get("Name"), Some("web01"));
    assert_eq!(result.records[0].id(), Some("0123456789abcdef0123456789abcdef"));
    assert_eq!(page.navigations().len(), 3);
    assert_eq!(served.load(Ordering::SeqCst), 3);
    assert!(result.records.iter().all(|record| !record.is_raw()));
}
