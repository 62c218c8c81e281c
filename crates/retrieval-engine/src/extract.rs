use once_cell::sync::Lazy;
use portal_core_types::Record;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::capture::{CardCapture, FormCapture, LabelledText, Observation, PageCapture, TableCapture};

pub const ID_FIELD: &str = "sys_id";

/// Keys descended through when looking for the entries of a script result.
pub const WRAPPER_KEYS: &[&str] = &[
    "result", "rules", "entry", "records", "log", "logs", "entries", "data",
];

const JSON_ID_KEYS: &[&str] = &["@name", "sys_id", "serial"];

static SYS_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"sys_id=([a-f0-9]{32})").ok());

/// Returns the 32-hex record identifier embedded in a link, if any.
pub fn sys_id_from_href(href: &str) -> Option<String> {
    SYS_ID
        .as_ref()?
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

const PAGE_PARSERS: &[(&str, fn(&PageCapture) -> Vec<Record>)] =
    &[("table", table_rows), ("cards", card_rows), ("form", form_rows)];

/// Normalizes heterogeneous observations into flat records.
///
/// Parsers run in a fixed order and the first one producing at least one row
/// wins. A captured list or form without rows is an empty result; only a page
/// with no recognised container becomes a single `{raw: ..}` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordExtractor;

impl RecordExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, observation: &Observation) -> Vec<Record> {
        match observation {
            Observation::Page(capture) => self.extract_page(capture),
            Observation::Json(value) => self.extract_json(value),
        }
    }

    pub fn extract_page(&self, capture: &PageCapture) -> Vec<Record> {
        for (name, parse) in PAGE_PARSERS {
            let rows = parse(capture);
            if !rows.is_empty() {
                debug!(target: "retrieval", parser = *name, rows = rows.len(), "page parsed");
                return rows;
            }
        }
        if capture.table.is_some() || capture.form.is_some() {
            debug!(target: "retrieval", url = %capture.url, "container captured without rows");
            return Vec::new();
        }
        debug!(target: "retrieval", url = %capture.url, "no structure recognised; keeping raw text");
        vec![Record::raw(&capture.text)]
    }

    pub fn extract_json(&self, value: &Value) -> Vec<Record> {
        let (container, wrapped) = json_container(value);
        let rows: Vec<Record> = match container {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(json_record)
                .collect(),
            Value::Object(map) => json_record(map).into_iter().collect(),
            _ => Vec::new(),
        };
        if !rows.is_empty() || is_empty_container(container, wrapped) {
            return rows;
        }
        vec![Record::raw(&compact(value))]
    }
}

fn table_rows(capture: &PageCapture) -> Vec<Record> {
    capture.table.as_ref().map(parse_table).unwrap_or_default()
}

fn card_rows(capture: &PageCapture) -> Vec<Record> {
    parse_cards(&capture.cards)
}

fn form_rows(capture: &PageCapture) -> Vec<Record> {
    capture.form.as_ref().map(parse_form).unwrap_or_default()
}

fn is_info_header(index: usize, header: &str) -> bool {
    index == 0 && matches!(header.trim(), "" | "i" | "?")
}

/// Classic list: header row plus data rows. A blank first header is the info
/// column whose link carries the record id.
fn parse_table(table: &TableCapture) -> Vec<Record> {
    let headers: Vec<Option<String>> = table
        .headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            if is_info_header(index, header) {
                None
            } else if header.trim().is_empty() {
                Some(format!("col_{index}"))
            } else {
                Some(header.trim().to_string())
            }
        })
        .collect();

    let mut rows = Vec::new();
    for cells in &table.rows {
        // "No records to display" spans the whole row in one cell
        if cells.len() == 1 && headers.len() > 1 {
            continue;
        }
        let mut record = Record::new();
        for (cell, header) in cells.iter().zip(headers.iter()) {
            let id = cell.href.as_deref().and_then(sys_id_from_href);
            match header {
                None => {
                    if let Some(id) = id {
                        record.insert(ID_FIELD, id);
                    }
                }
                Some(header) => {
                    record.insert(header.as_str(), cell.text.trim());
                    if let Some(id) = id {
                        if !record.contains_key(ID_FIELD) {
                            record.insert(ID_FIELD, id);
                        }
                    }
                }
            }
        }
        if record.iter().any(|(key, value)| key != ID_FIELD && !value.is_empty()) {
            if record.contains_key(ID_FIELD) {
                record.set_id_field(ID_FIELD);
            }
            rows.push(record);
        }
    }
    rows
}

fn parse_cards(cards: &[CardCapture]) -> Vec<Record> {
    cards
        .iter()
        .filter_map(|card| {
            let mut record = Record::new();
            for cell in &card.cells {
                if !cell.label.is_empty() && !cell.text.is_empty() {
                    record.insert(cell.label.as_str(), cell.text.as_str());
                }
            }
            for slot in &card.slots {
                if !slot.text.is_empty() {
                    record.insert(slot.name.as_str(), slot.text.as_str());
                }
            }
            let id = card.id.clone().filter(|id| !id.is_empty()).or_else(|| {
                card.slots
                    .iter()
                    .filter_map(|slot| slot.href.as_deref())
                    .find_map(sys_id_from_href)
            });
            if record.is_empty() {
                return None;
            }
            if let Some(id) = id {
                record.insert(ID_FIELD, id);
                record.set_id_field(ID_FIELD);
            }
            Some(record)
        })
        .collect()
}

/// Detail page: classic form groups first, workspace fields second.
fn parse_form(form: &FormCapture) -> Vec<Record> {
    let collect = |pairs: &[LabelledText]| {
        let mut record = Record::new();
        for pair in pairs {
            let label = pair.label.trim().trim_end_matches(':').trim();
            let value = pair.text.trim();
            if !label.is_empty() && !value.is_empty() {
                record.insert(label, value);
            }
        }
        record
    };
    let mut record = collect(&form.classic);
    if record.is_empty() {
        record = collect(&form.workspace);
    }
    if record.is_empty() {
        Vec::new()
    } else {
        vec![record]
    }
}

/// Innermost value reached through wrapper keys, and whether any was crossed.
fn json_container(value: &Value) -> (&Value, bool) {
    let mut current = value;
    let mut wrapped = false;
    while let Value::Object(map) = current {
        let inner = WRAPPER_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find(|inner| inner.is_object() || inner.is_array());
        match inner {
            Some(inner) => {
                current = inner;
                wrapped = true;
            }
            None => break,
        }
    }
    (current, wrapped)
}

fn is_empty_container(container: &Value, wrapped: bool) -> bool {
    match container {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => wrapped && map.is_empty(),
        _ => false,
    }
}

fn json_record(map: &Map<String, Value>) -> Option<Record> {
    if map.is_empty() {
        return None;
    }
    let mut record = Record::new();
    for (key, value) in map {
        record.insert(key.as_str(), scalar_text(value));
    }
    if let Some(key) = JSON_ID_KEYS.iter().find(|key| map.contains_key(**key)) {
        record.set_id_field(*key);
    }
    Some(record)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        nested => compact(nested),
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
