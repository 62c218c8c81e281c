use std::sync::Arc;

use cdp_adapter::mock::ScriptedPage;
use portal_core_types::{Locator, PortalError, QueryKind, TargetAdapter, TargetIdentity};
use retrieval_engine::{
    BrowserOperationTransport, EmptyResultPolicy, ListSource, MethodResolver, PaginatedFetcher,
    RecordExtractor, CAPTURE_SCRIPT,
};
use serde_json::{json, Value};
use target_adapters::panorama::scripts;
use target_adapters::{AdapterKind, PanoramaDirect, PortalAdapter, ServiceNowAdapter};

const SYS_ID: &str = "9d385017c611228701d22104cc95c371";

fn servicenow() -> ServiceNowAdapter {
    ServiceNowAdapter::new(TargetIdentity::parse("acme.service-now.com").unwrap())
}

#[tokio::test(start_paused = true)]
async fn record_lookup_falls_back_to_jsonv2_when_the_form_is_blank() {
    let page = Arc::new(
        ScriptedPage::logged_in("https://acme.service-now.com/nav_to.do")
            .showing(&Locator::css("form[name='form']"))
            .with_evaluator(|source, args| {
                if source == CAPTURE_SCRIPT {
                    return Ok(json!({
                        "url": "https://acme.service-now.com/incident.do",
                        "text": "Record not found",
                        "form": { "classic": [], "workspace": [] }
                    }));
                }
                assert!(args["url"].as_str().unwrap().contains("sysparm_query=number%3DINC0010001"));
                Ok(json!({ "records": [
                    { "sys_id": SYS_ID, "number": "INC0010001", "short_description": "VPN down" }
                ] }))
            }),
    );
    let transport = BrowserOperationTransport::new(page.clone());
    let adapter = servicenow();

    let candidates = adapter
        .candidate_operations_for(&QueryKind::Record {
            table: "incident".into(),
            identifier: "INC0010001".into(),
        })
        .unwrap();
    let resolved = MethodResolver::resolve(candidates, &transport).await.unwrap();

    assert_eq!(resolved.which_succeeded, "jsonv2_record");
    assert_eq!(resolved.failures.len(), 1);
    assert_eq!(resolved.failures[0].candidate, "record_form");
    let records = RecordExtractor::new().extract(&resolved.value);
    assert_eq!(records[0].id(), Some(SYS_ID));
    assert_eq!(records[0].get("short_description"), Some("VPN down"));
}

#[tokio::test(start_paused = true)]
async fn describe_table_reads_the_dictionary_list() {
    let page = Arc::new(
        ScriptedPage::logged_in("https://acme.service-now.com/nav_to.do")
            .showing(&Locator::css("table.list_table"))
            .with_evaluator(|_source, _args| {
                let row = |name: &str, label: &str, kind: &str, mandatory: &str| {
                    json!([
                        { "text": "" },
                        { "text": name },
                        { "text": label },
                        { "text": kind },
                        { "text": mandatory }
                    ])
                };
                Ok(json!({
                    "url": "https://acme.service-now.com/sys_dictionary_list.do",
                    "table": {
                        "headers": ["", "Column name", "Column label", "Type", "Mandatory"],
                        "rows": [
                            row("short_description", "Short description", "String", "false"),
                            row("number", "Number", "String", "true"),
                            row("number", "Number", "String", "true")
                        ]
                    }
                }))
            }),
    );
    let transport = BrowserOperationTransport::new(page.clone());
    let adapter = servicenow();

    let query = ServiceNowAdapter::describe_query("incident").unwrap();
    let source = ListSource::new(
        &adapter,
        &transport,
        target_adapters::servicenow::DICTIONARY_TABLE,
        Some(query),
    );
    let result = PaginatedFetcher::default()
        .fetch_one(&source, 0, target_adapters::servicenow::DESCRIBE_LIMIT)
        .await
        .unwrap();
    let description = ServiceNowAdapter::describe_fields("incident", &result.records);

    assert_eq!(description.field_count, 2);
    assert_eq!(description.fields[0].name, "number");
    assert!(description.fields[0].mandatory);
    assert_eq!(description.fields[1].label, "Short description");
    assert!(page.navigations()[0].contains("sysparm_query=name%3Dincident%5EelementISNOTEMPTY"));
}

fn empty_incident_list() -> Arc<ScriptedPage> {
    Arc::new(
        ScriptedPage::logged_in("https://acme.service-now.com/nav_to.do")
            .showing(&Locator::css("table.list_table"))
            .with_evaluator(|_source, _args| {
                Ok(json!({
                    "url": "https://acme.service-now.com/incident_list.do",
                    "text": "Incidents No records to display",
                    "table": {
                        "headers": ["", "Number", "Short description"],
                        "rows": [[{ "text": "No records to display" }]]
                    }
                }))
            }),
    )
}

#[tokio::test(start_paused = true)]
async fn empty_list_is_an_empty_result() {
    let page = empty_incident_list();
    let transport = BrowserOperationTransport::new(page);
    let adapter = servicenow();
    let source = ListSource::new(&adapter, &transport, "incident", Some("priority=9".into()));

    let all = PaginatedFetcher::new(EmptyResultPolicy::Success)
        .fetch_all(&source, 0, 200, 1000)
        .await
        .unwrap();
    assert_eq!(all.total_fetched, 0);
    assert!(all.records.is_empty());
    assert_eq!(all.page_count, 1);
    assert!(!all.truncated);

    let one = PaginatedFetcher::default().fetch_one(&source, 0, 50).await.unwrap();
    assert_eq!(one.total_fetched, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_list_fails_under_the_error_policy() {
    let page = empty_incident_list();
    let transport = BrowserOperationTransport::new(page);
    let adapter = servicenow();
    let source = ListSource::new(&adapter, &transport, "incident", Some("priority=9".into()));

    let err = PaginatedFetcher::new(EmptyResultPolicy::Error)
        .fetch_all(&source, 0, 200, 1000)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PortalError::EmptyResult("acme.service-now.com:incident?priority=9".into())
    );
}

fn panos_page(responder: impl Fn(&str, &Value) -> Value + Send + Sync + 'static) -> Arc<ScriptedPage> {
    Arc::new(
        ScriptedPage::logged_in("https://panorama.corp.example/").with_evaluator(move |source, args| {
            assert_eq!(source, scripts::DIRECT_RUN);
            let method = args[0].as_str().unwrap_or_default();
            Ok(responder(method, &args[1]))
        }),
    )
}

#[tokio::test]
async fn panorama_intents_run_through_the_page() {
    let page = panos_page(|method, params| match method {
        "DashboardDirect.getSystemResources" => {
            assert_eq!(params[0]["isCmsSelected"], true);
            json!({ "result": { "data": { "cpu": "3%", "memory": "41%" } } })
        }
        "ConfigAudit.getAllCommitVersionList" => json!({ "result": { "entry": [
            { "version": "112", "admin": "ops", "time": "2024/05/01 10:00:00" },
            { "version": "111", "admin": "ops", "time": "2024/04/30 09:12:00" }
        ] } }),
        other => panic!("unexpected {other}"),
    });
    let transport = BrowserOperationTransport::new(page.clone());
    let target = TargetIdentity::parse("panorama.corp.example").unwrap();
    let adapter = PortalAdapter::for_target(target, None).unwrap();
    assert_eq!(adapter.kind(), AdapterKind::Panorama);
    let direct = PanoramaDirect::new(adapter.as_panorama().unwrap(), &transport);

    let resources = direct.intent("system_resources", &Value::Null).await.unwrap();
    assert_eq!(resources.data, json!({ "cpu": "3%", "memory": "41%" }));

    let commits = direct
        .intent("commit_history", &json!({ "limit": 2 }))
        .await
        .unwrap();
    assert_eq!(commits.data.as_array().unwrap().len(), 2);
    assert_eq!(commits.data[0]["version"], "112");
}

#[tokio::test]
async fn panorama_rpc_errors_surface_for_the_escape_hatch() {
    let page = Arc::new(
        ScriptedPage::logged_in("https://panorama.corp.example/").with_evaluator(|_source, _args| {
            Err(cdp_adapter::AdapterError::script("RPC error: {\"@status\":\"error\"}"))
        }),
    );
    let transport = BrowserOperationTransport::new(page);
    let adapter = PortalAdapter::new(
        AdapterKind::Panorama,
        TargetIdentity::parse("panorama.corp.example").unwrap(),
    );
    let direct = PanoramaDirect::new(adapter.as_panorama().unwrap(), &transport);

    let err = direct
        .intent("direct", &json!({ "method": "Bogus.call" }))
        .await
        .unwrap_err();
    match err {
        PortalError::OperationExhausted { attempts, last_error, .. } => {
            assert_eq!(attempts, 1);
            assert!(last_error.contains("RPC error"));
        }
        other => panic!("unexpected {other:?}"),
    }
}
