use std::time::Duration;

use portal_core_types::{
    poll_until_some, truncate_chars, AttemptFailure, CandidateOperation, PortalError, Record,
    TargetAdapter,
};
use retrieval_engine::{MethodResolver, Observation, OperationTransport, RecordExtractor, Resolved};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::intent::PanoramaIntent;
use super::PanoramaAdapter;

pub const LOG_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const LOG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const LOG_POLL_RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Shaped answer to one intent.
#[derive(Clone, Debug, Serialize)]
pub struct IntentOutcome {
    pub intent: String,
    /// Winning call, or the chain of calls for multi-step intents.
    pub method: String,
    pub data: Value,
    pub failures: Vec<AttemptFailure>,
}

/// RPC client bound to one authenticated Panorama tab.
pub struct PanoramaDirect<'a> {
    adapter: &'a PanoramaAdapter,
    transport: &'a dyn OperationTransport,
    extractor: RecordExtractor,
}

impl<'a> PanoramaDirect<'a> {
    pub fn new(adapter: &'a PanoramaAdapter, transport: &'a dyn OperationTransport) -> Self {
        Self {
            adapter,
            transport,
            extractor: RecordExtractor::new(),
        }
    }

    /// One `Panos.direct.run` call, errors surfaced as-is.
    pub async fn run(&self, method: &str, params: Value) -> Result<Value, PortalError> {
        self.call(self.adapter.rpc(method, params, 0)).await
    }

    /// Config API `get` converted to JSON.
    pub async fn config(&self, xpath: &str) -> Result<Value, PortalError> {
        self.call(self.adapter.config_get(xpath, 0)).await
    }

    pub async fn intent(&self, name: &str, params: &Value) -> Result<IntentOutcome, PortalError> {
        let intent = PanoramaIntent::parse(name, params)?;
        self.execute(&intent).await
    }

    pub async fn execute(&self, intent: &PanoramaIntent) -> Result<IntentOutcome, PortalError> {
        let outcome = match intent {
            PanoramaIntent::Policies {
                rule_type,
                device_group,
                position,
            } => {
                self.policies(rule_type, device_group, position.expand())
                    .await?
            }
            PanoramaIntent::Logs {
                log_type,
                query,
                limit,
            } => self.logs(log_type, query, *limit).await?,
            single => {
                let resolved = self.resolve(self.adapter.intent_candidates(single)?).await?;
                IntentOutcome {
                    intent: single.name().to_string(),
                    method: resolved.which_succeeded,
                    data: self.shape(single, resolved.value),
                    failures: resolved.failures,
                }
            }
        };
        info!(
            target: "panorama",
            target_key = %self.adapter_key(),
            intent = %outcome.intent,
            method = %outcome.method,
            failures = outcome.failures.len(),
            "intent answered"
        );
        Ok(outcome)
    }

    fn adapter_key(&self) -> String {
        self.adapter.target().key()
    }

    async fn call(&self, candidate: CandidateOperation) -> Result<Value, PortalError> {
        let observation = self.transport.execute(&candidate).await?;
        json_of(&candidate.name, observation)
    }

    async fn resolve(
        &self,
        candidates: Vec<CandidateOperation>,
    ) -> Result<Resolved<Value>, PortalError> {
        let transport = self.transport;
        MethodResolver::resolve_with(candidates, |candidate| async move {
            let observation = transport.execute(&candidate).await?;
            json_of(&candidate.name, observation)
        })
        .await
    }

    async fn policies(
        &self,
        rule_type: &str,
        device_group: &str,
        positions: &[&str],
    ) -> Result<IntentOutcome, PortalError> {
        let tag = positions.len() > 1;
        let mut rows: Vec<Record> = Vec::new();
        let mut methods: Vec<String> = Vec::new();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut first_error: Option<PortalError> = None;

        for position in positions {
            let candidates = self
                .adapter
                .policy_candidates(rule_type, device_group, position);
            match self.resolve(candidates).await {
                Ok(resolved) => {
                    for mut record in self.extractor.extract_json(&resolved.value) {
                        if tag && !record.is_raw() {
                            record.insert("_position", *position);
                        }
                        rows.push(record);
                    }
                    methods.push(format!("{position}:{}", resolved.which_succeeded));
                    failures.extend(resolved.failures);
                }
                Err(PortalError::OperationExhausted {
                    last_error,
                    failures: tried,
                    attempts,
                }) => {
                    debug!(target: "panorama", position, attempts, "no rulebase method worked");
                    rows.push(
                        [("error", last_error.as_str()), ("position", *position)]
                            .into_iter()
                            .collect(),
                    );
                    failures.extend(tried.iter().cloned());
                    if first_error.is_none() {
                        first_error = Some(PortalError::OperationExhausted {
                            attempts,
                            last_error,
                            failures: tried,
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }

        if methods.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(IntentOutcome {
            intent: "policies".into(),
            method: methods.join(", "),
            data: records_value(&rows),
            failures,
        })
    }

    async fn logs(&self, log_type: &str, query: &str, limit: u32) -> Result<IntentOutcome, PortalError> {
        let enqueued = self
            .run(
                "MonitorDirect.enqueueLogRequest",
                json!([{ "logType": log_type, "query": query, "nlogs": limit, "dir": "backward" }]),
            )
            .await?;
        let job = job_id(&enqueued).ok_or_else(|| {
            PortalError::Operation(format!(
                "log request was not queued: {}",
                truncate_chars(&enqueued.to_string(), 300)
            ))
        })?;
        let label = job.as_str().map(str::to_string).unwrap_or_else(|| job.to_string());
        debug!(target: "panorama", job = %label, log_type, "log job queued");

        let this = self;
        let finished = poll_until_some(LOG_POLL_INTERVAL, LOG_POLL_TIMEOUT, || {
            let candidate = this.adapter.rpc_with_timeout(
                "MonitorDirect.pollLogRequest",
                json!([{ "jobId": job.clone() }]),
                0,
                LOG_POLL_RPC_TIMEOUT,
            );
            async move {
                match this.call(candidate).await {
                    Ok(status) if job_finished(&status) => Some(()),
                    Ok(_) => None,
                    Err(err) => {
                        debug!(target: "panorama", %err, "log poll failed");
                        None
                    }
                }
            }
        })
        .await;
        if finished.is_none() {
            return Err(PortalError::Operation(format!(
                "log query timed out for job {label}"
            )));
        }

        let raw = self
            .run("MonitorDirect.retrieveJSONLog", json!([{ "jobId": job }]))
            .await?;
        let records = match raw.pointer("/result/log/logs") {
            // a finished job with no matches carries `logs` without `entry`
            Some(logs) => logs
                .get("entry")
                .map(|entries| self.extractor.extract_json(entries))
                .unwrap_or_default(),
            None => self.extractor.extract_json(&raw),
        };
        Ok(IntentOutcome {
            intent: "logs".into(),
            method: "MonitorDirect.enqueueLogRequest/pollLogRequest/retrieveJSONLog".into(),
            data: records_value(&records),
            failures: Vec::new(),
        })
    }

    fn shape(&self, intent: &PanoramaIntent, raw: Value) -> Value {
        match intent {
            PanoramaIntent::SystemInfo => raw.pointer("/result/data/system").cloned().unwrap_or(raw),
            PanoramaIntent::SystemResources => raw.pointer("/result/data").cloned().unwrap_or(raw),
            PanoramaIntent::DeviceGroups => device_groups(&raw),
            PanoramaIntent::DeviceSummary => device_summary(&raw),
            PanoramaIntent::ManagedDevices => managed_devices(&raw),
            PanoramaIntent::Templates | PanoramaIntent::HaStatus | PanoramaIntent::SoftwareInfo => {
                raw.get("result").cloned().unwrap_or(raw)
            }
            PanoramaIntent::Objects { .. }
            | PanoramaIntent::Zones { .. }
            | PanoramaIntent::Interfaces { .. }
            | PanoramaIntent::Routing { .. }
            | PanoramaIntent::Jobs { .. } => records_value(&self.extractor.extract_json(&raw)),
            PanoramaIntent::CommitHistory { .. } => {
                let entries = raw.pointer("/result/entry").unwrap_or(&raw);
                records_value(&self.extractor.extract_json(entries))
            }
            PanoramaIntent::Direct { .. } => raw,
            PanoramaIntent::Policies { .. } | PanoramaIntent::Logs { .. } => {
                records_value(&self.extractor.extract_json(&raw))
            }
        }
    }
}

fn json_of(name: &str, observation: Observation) -> Result<Value, PortalError> {
    match observation {
        Observation::Json(value) => Ok(value),
        Observation::Page(capture) => Err(PortalError::Operation(format!(
            "{name} captured page {} instead of returning data",
            capture.url
        ))),
    }
}

fn records_value(records: &[Record]) -> Value {
    serde_json::to_value(records).unwrap_or_default()
}

fn raw_value(raw: &Value) -> Value {
    records_value(&[Record::raw(&raw.to_string())])
}

/// Objects under `value`: an array's items, or the object itself.
fn entries(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(object @ Value::Object(_)) => vec![object],
        _ => Vec::new(),
    }
}

fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn named_counts(items: Vec<&Value>, label: &str) -> Value {
    items
        .into_iter()
        .map(|entry| json!({ "name": text(entry.get("@name")), label: count(entry.get("count")) }))
        .collect()
}

fn device_groups(raw: &Value) -> Value {
    let Some(summary) = raw.pointer("/result/data/device-summary") else {
        return raw_value(raw);
    };
    named_counts(entries(summary.pointer("/dg-summary/entry")), "device_count")
}

fn device_summary(raw: &Value) -> Value {
    let Some(summary) = raw.pointer("/result/data/device-summary") else {
        return raw_value(raw);
    };
    let mut out = Map::new();
    out.insert("connected".into(), json!(count(summary.get("connected"))));
    out.insert("disconnected".into(), json!(count(summary.get("dis-connected"))));
    let versions = entries(summary.pointer("/sw-version/entry"));
    if !versions.is_empty() {
        let versions: Value = versions
            .into_iter()
            .map(|entry| json!({ "version": text(entry.get("@name")), "count": count(entry.get("count")) }))
            .collect();
        out.insert("sw_versions".into(), versions);
    }
    let groups = entries(summary.pointer("/dg-summary/entry"));
    if !groups.is_empty() {
        out.insert("device_groups".into(), named_counts(groups, "count"));
    }
    Value::Object(out)
}

const DEVICE_FIELDS: &[(&str, &str)] = &[
    ("name", "devicename"),
    ("serial", "serial"),
    ("ip_address", "ip-address"),
    ("model", "model"),
    ("sw_version", "sw-version"),
    ("connected", "connected"),
    ("ha_mode", "haMode"),
    ("device_group", "device-group"),
    ("template", "template"),
    ("operational_mode", "operational-mode"),
];

fn managed_devices(raw: &Value) -> Value {
    let Some(list) = raw.pointer("/result/entry") else {
        return raw_value(raw);
    };
    let devices: Vec<Record> = entries(Some(list))
        .into_iter()
        .map(|entry| {
            let mut record: Record = DEVICE_FIELDS
                .iter()
                .map(|(name, key)| (*name, text(entry.get(*key))))
                .collect();
            record.set_id_field("serial");
            record
        })
        .collect();
    records_value(&devices)
}

fn job_id(enqueued: &Value) -> Option<Value> {
    [
        enqueued.pointer("/result/job"),
        enqueued.get("job"),
        enqueued.get("result"),
    ]
    .into_iter()
    .flatten()
    .find(|value| match value {
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
        _ => false,
    })
    .cloned()
}

fn job_finished(status: &Value) -> bool {
    status
        .pointer("/result/status")
        .or_else(|| status.get("status"))
        .and_then(Value::as_str)
        .is_some_and(|state| matches!(state, "completed" | "FIN"))
}
