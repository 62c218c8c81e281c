//! ServiceNow-style instance: classic UI lists and forms, workspace lists,
//! JSONv2 as the last resort.

use std::time::Duration;

use portal_core_types::adapter::default_idp_indicators;
use portal_core_types::{
    CandidateOperation, CaptureLayout, CardLayout, CardSlot, Filter, FilterOperator, FormLayout,
    JoinOp, Locator, LoginAffordances, NavProbe, OperationCall, PageCall, PortalError, QueryKind,
    Record, ScriptCall, TableLayout, TargetAdapter, TargetIdentity,
};
use retrieval_engine::QueryBuilder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::form_urlencoded;

const MAIN_FRAME: &str = "gsft_main";
const CLASSIC_TIMEOUT: Duration = Duration::from_secs(15);
const WORKSPACE_TIMEOUT: Duration = Duration::from_secs(10);
const KB_SETTLE: Duration = Duration::from_secs(2);

pub const INCIDENT_TABLE: &str = "incident";
pub const CHANGE_TABLE: &str = "change_request";
/// Page size of incident and change queries when the caller gives none.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Incident state words and the numeric values the `state` column stores.
pub const INCIDENT_STATES: &[(&str, &str)] = &[
    ("new", "1"),
    ("in_progress", "2"),
    ("on_hold", "3"),
    ("resolved", "6"),
    ("closed", "7"),
];

const CHANGE_TYPES: &[&str] = &["standard", "normal", "emergency"];

/// Table whose rows describe every other table's columns.
pub const DICTIONARY_TABLE: &str = "sys_dictionary";
pub const DESCRIBE_LIMIT: usize = 500;

const KNOWN_TABLES: &[(&str, &str)] = &[
    ("incident", "incident_list.do"),
    ("change_request", "change_request_list.do"),
    ("problem", "problem_list.do"),
    ("cmdb_ci", "cmdb_ci_list.do"),
    ("cmdb_ci_server", "cmdb_ci_server_list.do"),
    ("cmdb_ci_app_server", "cmdb_ci_app_server_list.do"),
    ("cmdb_ci_database", "cmdb_ci_database_list.do"),
    ("sys_user", "sys_user_list.do"),
    ("sys_user_group", "sys_user_group_list.do"),
    ("kb_knowledge", "kb_knowledge_list.do"),
    ("task", "task_list.do"),
    ("sc_request", "sc_request_list.do"),
    ("sc_req_item", "sc_req_item_list.do"),
];

/// `{url, skip}`: fetches JSONv2 records with the session cookies and drops
/// the first `skip`, since JSONv2 has no offset parameter.
const JSONV2_SCRIPT: &str = r#"async (request) => {
  const response = await fetch(request.url, {
    credentials: 'same-origin',
    headers: { Accept: 'application/json' },
  });
  if (!response.ok) throw new Error(`JSONv2 returned HTTP ${response.status}`);
  const body = await response.json();
  const records = Array.isArray(body.records) ? body.records : [];
  return { records: records.slice(request.skip || 0) };
}"#;

pub struct ServiceNowAdapter {
    target: TargetIdentity,
    login: LoginAffordances,
    nav: NavProbe,
    idp: Vec<String>,
}

impl ServiceNowAdapter {
    pub fn new(target: TargetIdentity) -> Self {
        let mut sso_links = css_all(&[
            "a[href*='sso']",
            "a[href*='saml']",
            "#sso_login",
            ".sso-login",
            "[data-sso]",
        ]);
        sso_links.extend(
            ["Single Sign", "Use external", "Company Login", "Log in with"]
                .into_iter()
                .map(|text| Locator::text(text, Some("a, button"))),
        );

        Self {
            target,
            login: LoginAffordances {
                login_form: css_all(&[
                    "input#user_password",
                    "input[name=\"user_password\"]",
                    "#loginForm",
                    "input[type=\"password\"]",
                ]),
                sso_links,
                ..LoginAffordances::default()
            },
            nav: NavProbe {
                locators: css_all(&[
                    "iframe#gsft_main",
                    ".navpage-header",
                    ".sn-polaris-header",
                    "#nav_west_center",
                    ".sn-polaris-nav",
                    "#gsft_nav",
                    ".nav-body",
                    ".sn-polaris-navigation",
                ]),
                labels: ["All", "Favorites", "History", "Workspaces"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                ..NavProbe::default()
            },
            idp: default_idp_indicators(),
        }
    }

    /// Relative list page for `table`.
    pub fn list_page(table: &str) -> String {
        KNOWN_TABLES
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, page)| page.to_string())
            .unwrap_or_else(|| format!("{table}_list.do"))
    }

    /// `sys_dictionary` query listing the columns of `table`.
    pub fn describe_query(table: &str) -> Result<String, PortalError> {
        check_table(table)?;
        Ok(QueryBuilder::build(
            &[
                Filter::new("name", FilterOperator::Eq, table),
                Filter::unary("element", FilterOperator::IsNotEmpty),
            ],
            JoinOp::And,
        ))
    }

    /// Folds `sys_dictionary` rows into a column list, one entry per name.
    pub fn describe_fields(table: &str, rows: &[Record]) -> TableDescription {
        let mut fields: Vec<FieldInfo> = Vec::new();
        for row in rows {
            let name = row
                .get("Column name")
                .or_else(|| row.get("Element"))
                .unwrap_or_default()
                .trim();
            if name.is_empty() || fields.iter().any(|field| field.name == name) {
                continue;
            }
            fields.push(FieldInfo {
                name: name.to_string(),
                label: row
                    .get("Column label")
                    .or_else(|| row.get("Label"))
                    .unwrap_or(name)
                    .to_string(),
                field_type: row.get("Type").unwrap_or_default().to_string(),
                mandatory: row
                    .get("Mandatory")
                    .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            });
        }
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        TableDescription {
            table: table.to_string(),
            field_count: fields.len(),
            fields,
        }
    }

    fn list_candidates(
        &self,
        table: &str,
        query: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Vec<CandidateOperation> {
        let mut params = form_urlencoded::Serializer::new(String::new());
        if let Some(query) = query {
            params.append_pair("sysparm_query", query);
        }
        if offset > 0 {
            params.append_pair("sysparm_first_row", &offset.to_string());
        }
        params.append_pair("sysparm_rows", &limit.to_string());
        let url = self
            .target
            .url_for(&format!("{}?{}", Self::list_page(table), params.finish()));
        let parameters = json!({ "table": table, "query": query, "offset": offset, "limit": limit });

        let classic = PageCall::new(url.clone(), classic_list_layout(limit))
            .ready_on(
                css_all(&[
                    "iframe#gsft_main",
                    ".list2_body",
                    "table.list_table",
                    ".data_list_table",
                ]),
                CLASSIC_TIMEOUT,
            )
            .settle_for(Duration::from_millis(500));
        let workspace = PageCall::new(url, workspace_list_layout(limit)).ready_on(
            css_all(&["[data-testid='list-layout']", ".list-component", ".sn-list"]),
            WORKSPACE_TIMEOUT,
        );

        let mut json_params = form_urlencoded::Serializer::new(String::new());
        json_params.append_pair("sysparm_action", "getRecords");
        if let Some(query) = query {
            json_params.append_pair("sysparm_query", query);
        }
        json_params.append_pair("sysparm_record_count", &offset.saturating_add(limit).to_string());
        let json_url = self
            .target
            .url_for(&format!("{table}.do?JSONv2&{}", json_params.finish()));

        vec![
            CandidateOperation::new("classic_list", 0, OperationCall::Page(classic))
                .with_parameters(parameters.clone()),
            CandidateOperation::new("workspace_list", 1, OperationCall::Page(workspace))
                .with_parameters(parameters.clone()),
            CandidateOperation::new(
                "jsonv2_list",
                2,
                OperationCall::Script(ScriptCall::new(
                    JSONV2_SCRIPT,
                    json!({ "url": json_url, "skip": offset }),
                )),
            )
            .with_parameters(parameters),
        ]
    }

    fn record_candidates(&self, table: &str, identifier: &str) -> Vec<CandidateOperation> {
        let identifier = identifier.trim();
        let (form_query, json_query) = if is_sys_id(identifier) {
            (
                format!("sys_id={identifier}"),
                format!("sysparm_sys_id={identifier}"),
            )
        } else {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("sysparm_query", &format!("number={identifier}"))
                .finish();
            (query.clone(), query)
        };
        let parameters = json!({ "table": table, "identifier": identifier });

        let form = PageCall::new(
            self.target.url_for(&format!("{table}.do?{form_query}")),
            form_layout(),
        )
        .ready_on(
            css_all(&[
                "iframe#gsft_main",
                "form[name='form']",
                ".form-group",
                "[data-testid='record-form']",
            ]),
            CLASSIC_TIMEOUT,
        )
        .settle_for(Duration::from_millis(500));
        let json_url = self.target.url_for(&format!(
            "{table}.do?JSONv2&sysparm_action=get&{json_query}"
        ));

        vec![
            CandidateOperation::new("record_form", 0, OperationCall::Page(form))
                .with_parameters(parameters.clone()),
            CandidateOperation::new(
                "jsonv2_record",
                1,
                OperationCall::Script(ScriptCall::new(
                    JSONV2_SCRIPT,
                    json!({ "url": json_url, "skip": 0 }),
                )),
            )
            .with_parameters(parameters),
        ]
    }

    fn search_candidates(&self, text: &str, limit: usize) -> Vec<CandidateOperation> {
        let search = form_urlencoded::Serializer::new(String::new())
            .append_pair("sysparm_search", text)
            .finish();
        let page = PageCall::new(
            self.target.url_for(&format!("kb_find.do?{search}")),
            knowledge_layout(limit),
        )
        .settle_for(KB_SETTLE);

        let query = QueryBuilder::build(
            &[
                Filter::new("short_description", FilterOperator::Like, text),
                Filter::new("text", FilterOperator::Like, text),
            ],
            JoinOp::Or,
        );
        let fallback = self.list_candidates("kb_knowledge", Some(&query), 0, limit);
        let parameters = json!({ "text": text, "limit": limit });

        let mut candidates = vec![CandidateOperation::new(
            "knowledge_search",
            0,
            OperationCall::Page(page),
        )
        .with_parameters(parameters)];
        candidates.extend(fallback.into_iter().map(|mut candidate| {
            candidate.name = format!("knowledge_{}", candidate.name);
            candidate.priority += 1;
            candidate
        }));
        candidates
    }
}

impl TargetAdapter for ServiceNowAdapter {
    fn kind(&self) -> &'static str {
        "servicenow"
    }

    fn target(&self) -> &TargetIdentity {
        &self.target
    }

    fn landing_url(&self) -> String {
        self.target.url_for("/nav_to.do")
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
        match kind {
            QueryKind::List {
                table,
                query,
                offset,
                limit,
            } => {
                check_table(table)?;
                Ok(self.list_candidates(table, query.as_deref(), *offset, *limit))
            }
            QueryKind::Record { table, identifier } => {
                check_table(table)?;
                if identifier.trim().is_empty() {
                    return Err(PortalError::QueryBuild("record identifier is empty".into()));
                }
                Ok(self.record_candidates(table, identifier))
            }
            QueryKind::Search { text, limit } => {
                if text.trim().is_empty() {
                    return Err(PortalError::QueryBuild("search text is empty".into()));
                }
                Ok(self.search_candidates(text.trim(), *limit))
            }
            QueryKind::Intent { name, .. } => Err(PortalError::QueryBuild(format!(
                "servicenow has no intent {name:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mandatory: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub table: String,
    pub field_count: usize,
    pub fields: Vec<FieldInfo>,
}

/// Incident lookup; every set field narrows the result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentQuery {
    /// Pre-encoded query, put ahead of the other conditions.
    pub query: Option<String>,
    pub assignment_group: Option<String>,
    /// A word from [`INCIDENT_STATES`] or a raw state value.
    pub state: Option<String>,
    /// 1 (critical) to 5 (planning).
    pub priority: Option<u8>,
    pub limit: Option<usize>,
}

impl IncidentQuery {
    /// Encoded query, `None` when nothing narrows it.
    pub fn encoded(&self) -> Result<Option<String>, PortalError> {
        let mut parts = Vec::new();
        push_raw(&mut parts, self.query.as_deref());
        if let Some(group) = present(self.assignment_group.as_deref()) {
            parts.push(format!("assignment_group.name={}", clause_value(group)?));
        }
        if let Some(state) = present(self.state.as_deref()) {
            parts.push(format!("state={}", incident_state(state)?));
        }
        if let Some(priority) = self.priority {
            if !(1..=5).contains(&priority) {
                return Err(PortalError::QueryBuild(format!(
                    "priority must be between 1 and 5, got {priority}"
                )));
            }
            parts.push(format!("priority={priority}"));
        }
        Ok(joined(parts))
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}

/// Change request lookup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeQuery {
    pub query: Option<String>,
    /// `standard`, `normal` or `emergency`.
    #[serde(rename = "type")]
    pub change_type: Option<String>,
    /// Passed through as the raw state value.
    pub state: Option<String>,
    pub limit: Option<usize>,
}

impl ChangeQuery {
    pub fn encoded(&self) -> Result<Option<String>, PortalError> {
        let mut parts = Vec::new();
        push_raw(&mut parts, self.query.as_deref());
        if let Some(kind) = present(self.change_type.as_deref()) {
            let kind = kind.to_ascii_lowercase();
            if !CHANGE_TYPES.contains(&kind.as_str()) {
                return Err(PortalError::QueryBuild(format!(
                    "unknown change type {kind:?} (expected standard, normal or emergency)"
                )));
            }
            parts.push(format!("type={kind}"));
        }
        if let Some(state) = present(self.state.as_deref()) {
            parts.push(format!("state={}", clause_value(state)?));
        }
        Ok(joined(parts))
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}

/// Maps a state word to its stored value; anything else passes through.
pub fn incident_state(state: &str) -> Result<String, PortalError> {
    let state = clause_value(state)?;
    let word = state.to_ascii_lowercase().replace([' ', '-'], "_");
    Ok(INCIDENT_STATES
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, value)| value.to_string())
        .unwrap_or(state))
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn push_raw(parts: &mut Vec<String>, query: Option<&str>) {
    if let Some(query) = present(query) {
        parts.push(query.to_string());
    }
}

fn joined(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(JoinOp::And.token()))
    }
}

/// A value that cannot open a new clause.
fn clause_value(value: &str) -> Result<String, PortalError> {
    if value.contains('^') {
        return Err(PortalError::QueryBuild(format!(
            "value {value:?} must not contain '^'"
        )));
    }
    Ok(value.trim().to_string())
}

fn check_table(table: &str) -> Result<(), PortalError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PortalError::QueryBuild(format!("invalid table name {table:?}")))
    }
}

fn is_sys_id(identifier: &str) -> bool {
    identifier.len() == 32
        && identifier
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn css_all(selectors: &[&str]) -> Vec<Locator> {
    selectors.iter().map(|s| Locator::css(*s)).collect()
}

fn classic_list_layout(limit: usize) -> CaptureLayout {
    CaptureLayout {
        frame: Some(MAIN_FRAME.into()),
        table: Some(TableLayout {
            table: ".list2_body table, table.list_table, .data_list_table table, [data-testid='list-layout'] table"
                .into(),
            header_row: "thead tr, tr.list_header, tr.header_row".into(),
            rows: "tbody tr, tr.list_row, tr.list_odd, tr.list_even".into(),
        }),
        max_rows: limit,
        ..CaptureLayout::default()
    }
}

fn workspace_list_layout(limit: usize) -> CaptureLayout {
    CaptureLayout {
        frame: Some(MAIN_FRAME.into()),
        cards: Some(CardLayout {
            item: "[data-testid='list-row'], .list-row, .sn-list-row".into(),
            cells: "[data-testid='cell'], .list-cell, .field-value".into(),
            label_attrs: vec!["data-label".into(), "aria-label".into()],
            id_attrs: vec!["data-sys-id".into(), "data-record-id".into()],
            slots: Vec::new(),
        }),
        max_rows: limit,
        ..CaptureLayout::default()
    }
}

fn form_layout() -> CaptureLayout {
    CaptureLayout {
        frame: Some(MAIN_FRAME.into()),
        form: Some(FormLayout {
            form: "form[name='form'], form.form-horizontal".into(),
            groups: ".form-group, .form_field, tr[id^='element.'], .section_header_content_no_scroll tr"
                .into(),
            label: "label, .label, .control-label, span.label_text".into(),
            input: "input:not([type='hidden']), select, textarea".into(),
            display: vec![
                ".form-control-static, .display_value, span.readonly, a.linked".into(),
                ".ref_readonly, .reference".into(),
            ],
            workspace_groups: "[data-testid='form-field'], .form-field, .sn-form-field".into(),
            workspace_label: "[data-testid='label'], .field-label".into(),
            workspace_value: "[data-testid='value'], .field-value".into(),
        }),
        ..CaptureLayout::default()
    }
}

fn knowledge_layout(limit: usize) -> CaptureLayout {
    CaptureLayout {
        frame: Some(MAIN_FRAME.into()),
        cards: Some(CardLayout {
            item: ".kb_article, .search_result, .kb-result, [data-testid='search-result']".into(),
            cells: String::new(),
            label_attrs: Vec::new(),
            id_attrs: Vec::new(),
            slots: vec![
                CardSlot::new("title", ".kb_title, .result_title, h3, a.kb-article-link"),
                CardSlot::new(
                    "short_description",
                    ".kb_short_description, .result_snippet, .kb-snippet",
                ),
                CardSlot::new("category", ".kb_category, .category"),
            ],
        }),
        max_rows: limit,
        ..CaptureLayout::default()
    }
}
