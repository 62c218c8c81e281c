use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cdp_adapter::mock::{ScriptedLauncher, ScriptedPage};
use portal_bridge::{
    BridgeConfig, ChangeQuery, FilterSpec, IncidentQuery, PortalService, TableQuery, TargetConfig,
};
use portal_core_types::{Locator, PageSnapshot};
use retrieval_engine::CAPTURE_SCRIPT;
use serde_json::{json, Value};
use target_adapters::panorama::scripts;
use tempfile::TempDir;

const SNOW: &str = "https://acme.service-now.com";
const PANO: &str = "https://panorama.corp.example";

fn config(dir: &TempDir, urls: &[&str]) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.targets = urls.iter().map(|url| TargetConfig::new(*url)).collect();
    config.session.interactive = false;
    config.session.state_dir = Some(dir.path().to_path_buf());
    config
}

fn service(dir: &TempDir, urls: &[&str], pages: Vec<Arc<ScriptedPage>>) -> (PortalService, Arc<ScriptedLauncher>) {
    let launcher = Arc::new(ScriptedLauncher::new(pages));
    let service = PortalService::new(config(dir, urls), launcher.clone(), None).unwrap();
    (service, launcher)
}

fn incident_list() -> Value {
    let row = |sys_id: &str, number: &str, priority: &str| {
        json!([
            { "text": "", "href": format!("incident.do?sys_id={sys_id}") },
            { "text": number },
            { "text": priority }
        ])
    };
    json!({
        "url": format!("{SNOW}/incident_list.do"),
        "table": {
            "headers": ["", "Number", "Priority"],
            "rows": [
                row("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "INC0010001", "1 - Critical"),
                row("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", "INC0010002", "1 - Critical")
            ]
        }
    })
}

#[tokio::test(start_paused = true)]
async fn filtered_table_query_runs_through_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::logged_in(&format!("{SNOW}/nav_to.do"))
            .showing(&Locator::css("table.list_table"))
            .with_evaluator(|source, _args| {
                assert_eq!(source, CAPTURE_SCRIPT);
                Ok(incident_list())
            }),
    );
    let (service, launcher) = service(&dir, &[SNOW], vec![page.clone()]);

    let result = service
        .query_table(TableQuery {
            table: "incident".into(),
            filters: vec![
                FilterSpec {
                    field: "priority".into(),
                    operator: "=".into(),
                    value: Some(json!(1)),
                },
                FilterSpec {
                    field: "active".into(),
                    operator: "eq".into(),
                    value: Some(json!(true)),
                },
            ],
            limit: Some(50),
            ..TableQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(result.total_fetched, 2);
    assert_eq!(result.page_count, 1);
    assert!(!result.truncated);
    assert_eq!(result.records[1].id(), Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"));
    assert_eq!(launcher.launch_count(), 1);
    assert!(page
        .navigations()
        .iter()
        .any(|url| url.contains("incident_list.do?sysparm_query=priority%3D1%5Eactive%3Dtrue&sysparm_rows=50")));

    let sessions = service.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn fetch_all_pages_by_the_requested_limit() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let page = Arc::new(
        ScriptedPage::logged_in(&format!("{SNOW}/nav_to.do"))
            .showing(&Locator::css("table.list_table"))
            .with_evaluator(move |_source, _args| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(incident_list())
                } else {
                    Ok(json!({
                        "url": format!("{SNOW}/incident_list.do"),
                        "table": { "headers": ["", "Number", "Priority"], "rows": [] }
                    }))
                }
            }),
    );
    let (service, _launcher) = service(&dir, &[SNOW], vec![page.clone()]);

    let result = service
        .query_table(TableQuery {
            table: "incident".into(),
            limit: Some(2),
            fetch_all: true,
            ..TableQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(result.total_fetched, 2);
    assert_eq!(result.page_count, 1);
    let lists: Vec<String> = page
        .navigations()
        .into_iter()
        .filter(|url| url.contains("incident_list.do"))
        .collect();
    assert_eq!(
        lists,
        [
            format!("{SNOW}/incident_list.do?sysparm_rows=2"),
            format!("{SNOW}/incident_list.do?sysparm_first_row=2&sysparm_rows=2"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn incident_query_maps_the_state_word() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::logged_in(&format!("{SNOW}/nav_to.do"))
            .showing(&Locator::css("table.list_table"))
            .with_evaluator(|_source, _args| Ok(incident_list())),
    );
    let (service, _launcher) = service(&dir, &[SNOW], vec![page.clone()]);

    let result = service
        .query_incidents(
            SNOW,
            IncidentQuery {
                state: Some("on_hold".into()),
                priority: Some(1),
                ..IncidentQuery::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.total_fetched, 2);
    assert!(page
        .navigations()
        .iter()
        .any(|url| url.ends_with("incident_list.do?sysparm_query=state%3D3%5Epriority%3D1&sysparm_rows=50")));
}

#[tokio::test]
async fn change_query_needs_a_servicenow_target_and_a_known_type() {
    let dir = tempfile::tempdir().unwrap();
    let (service, launcher) = service(&dir, &[SNOW, PANO], Vec::new());

    let err = service
        .query_changes(PANO, ChangeQuery::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_query");
    let err = service
        .query_changes(
            SNOW,
            ChangeQuery {
                change_type: Some("urgent".into()),
                ..ChangeQuery::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_query");
    let err = service
        .query_incidents(
            SNOW,
            IncidentQuery {
                limit: Some(0),
                ..IncidentQuery::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_query");
    assert_eq!(launcher.launch_count(), 0);
}

#[test]
fn build_query_encodes_without_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let (service, launcher) = service(&dir, &[SNOW], Vec::new());
    let filters = [
        FilterSpec {
            field: "priority".into(),
            operator: "<=".into(),
            value: Some(json!(2)),
        },
        FilterSpec {
            field: "category".into(),
            operator: "eq".into(),
            value: Some(json!("network")),
        },
    ];

    assert_eq!(service.build_query(&filters, "or").unwrap(), "priority<=2^ORcategory=network");
    assert_eq!(service.build_query(&filters, "xor").unwrap(), "priority<=2^category=network");
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn login_wall_without_operator_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(PageSnapshot {
        url: format!("{SNOW}/login.do"),
        title: "Log in".into(),
        login_form: true,
        ..PageSnapshot::default()
    }));
    let (service, _launcher) = service(&dir, &[SNOW], vec![page.clone()]);

    let err = service
        .get_record(SNOW, "incident", "INC0010001")
        .await
        .unwrap_err();
    assert_eq!(err.code, "authentication_required");
    assert!(!err.retryable);
    assert!(!page
        .navigations()
        .iter()
        .any(|url| url.contains("incident.do")));
}

#[tokio::test(start_paused = true)]
async fn panorama_intent_through_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::logged_in(&format!("{PANO}/")).with_evaluator(|source, args| {
            assert_eq!(source, scripts::DIRECT_RUN);
            match args[0].as_str() {
                Some("DashboardDirect.getSystemInfo") => Ok(json!({
                    "result": { "data": { "system": { "hostname": "pano-01", "model": "M-600" } } }
                })),
                other => panic!("unexpected rpc {other:?}"),
            }
        }),
    );
    let (service, _launcher) = service(&dir, &[SNOW, PANO], vec![page]);

    let outcome = service
        .intent(PANO, "system_info", Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome.data["model"], "M-600");
    assert_eq!(outcome.method, "DashboardDirect.getSystemInfo");
}

#[tokio::test]
async fn target_specific_tools_are_refused_before_any_launch() {
    let dir = tempfile::tempdir().unwrap();
    let (service, launcher) = service(&dir, &[SNOW, PANO], Vec::new());

    let err = service.describe_table(PANO, "incident").await.unwrap_err();
    assert_eq!(err.code, "invalid_query");
    let err = service.intent(SNOW, "system_info", Value::Null).await.unwrap_err();
    assert_eq!(err.code, "invalid_query");
    let err = service.logout("https://unknown.example").await.unwrap_err();
    assert_eq!(err.code, "unknown_target");
    let err = service
        .query_table(TableQuery {
            table: "incident".into(),
            ..TableQuery::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_query");
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn status_and_logout_without_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let (service, launcher) = service(&dir, &[SNOW], Vec::new());

    let status = service.check_status("").await.unwrap();
    assert!(!status.authenticated);
    assert!(status.session.is_none());
    assert_eq!(status.target, "acme.service-now.com");

    service.logout(SNOW).await.unwrap();
    service.logout(SNOW).await.unwrap();
    assert_eq!(launcher.launch_count(), 0);
    assert_eq!(service.targets()[0].landing_url, format!("{SNOW}/nav_to.do"));
}
