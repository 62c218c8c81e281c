use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Locator;

/// When a navigation counts as finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    DomReady,
    #[default]
    Load,
    NetworkIdle,
}

/// What the caller wants, before the adapter turns it into candidates.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryKind {
    List {
        table: String,
        query: Option<String>,
        offset: usize,
        limit: usize,
    },
    Record {
        table: String,
        identifier: String,
    },
    Search {
        text: String,
        limit: usize,
    },
    /// Target-specific intent such as `system_info` or `policies`.
    Intent {
        name: String,
        params: Value,
    },
}

impl QueryKind {
    pub fn label(&self) -> String {
        match self {
            QueryKind::List { table, .. } => format!("list:{table}"),
            QueryKind::Record { table, .. } => format!("record:{table}"),
            QueryKind::Search { .. } => "search".to_string(),
            QueryKind::Intent { name, .. } => format!("intent:{name}"),
        }
    }
}

/// One alternative way of achieving an intent.
#[derive(Clone, Debug)]
pub struct CandidateOperation {
    pub name: String,
    pub parameters: Value,
    pub priority: u32,
    pub call: OperationCall,
}

impl CandidateOperation {
    pub fn new(name: impl Into<String>, priority: u32, call: OperationCall) -> Self {
        Self {
            name: name.into(),
            parameters: Value::Null,
            priority,
            call,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Concrete transport of a candidate.
#[derive(Clone, Debug)]
pub enum OperationCall {
    /// Navigate, wait for any `ready` locator, then capture the rendered structure.
    Page(PageCall),
    /// Evaluate a function expression in the current page.
    Script(ScriptCall),
}

#[derive(Clone, Debug)]
pub struct PageCall {
    pub url: String,
    pub wait: WaitPolicy,
    pub ready: Vec<Locator>,
    pub capture: CaptureLayout,
    pub timeout: Duration,
    /// Pause after readiness before capturing; used when nothing reliable signals "done".
    pub settle: Duration,
}

impl PageCall {
    pub fn new(url: impl Into<String>, capture: CaptureLayout) -> Self {
        Self {
            url: url.into(),
            wait: WaitPolicy::NetworkIdle,
            ready: Vec::new(),
            capture,
            timeout: Duration::from_secs(15),
            settle: Duration::ZERO,
        }
    }

    pub fn ready_on(mut self, ready: Vec<Locator>, timeout: Duration) -> Self {
        self.ready = ready;
        self.timeout = timeout;
        self
    }

    pub fn settle_for(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ScriptCall {
    /// Function expression, invoked with `args`.
    pub source: String,
    pub args: Value,
    pub timeout: Duration,
}

impl ScriptCall {
    pub fn new(source: impl Into<String>, args: Value) -> Self {
        Self {
            source: source.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Which structures the page capture script should collect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureLayout {
    /// Iframe holding the content, when the application wraps it in one.
    pub frame: Option<String>,
    pub table: Option<TableLayout>,
    pub cards: Option<CardLayout>,
    pub form: Option<FormLayout>,
    pub max_rows: usize,
    pub text_limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableLayout {
    pub table: String,
    pub header_row: String,
    pub rows: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardLayout {
    pub item: String,
    pub cells: String,
    pub label_attrs: Vec<String>,
    pub id_attrs: Vec<String>,
    pub slots: Vec<CardSlot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardSlot {
    pub name: String,
    pub selector: String,
}

impl CardSlot {
    pub fn new(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormLayout {
    pub form: String,
    pub groups: String,
    pub label: String,
    pub input: String,
    pub display: Vec<String>,
    pub workspace_groups: String,
    pub workspace_label: String,
    pub workspace_value: String,
}
