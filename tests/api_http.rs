// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /trends (404 before the first run, filters after)
// - POST /agents (201 / 400 / 409), GET /agents/{name}
// - GET /missions, GET /missions/{id}
// - POST /missions/{id}/complete
// - GET /hall-of-fame (JSON and markdown), GET /runs, GET /metrics

use std::sync::Arc;

use axum::{
    body::{self, Body},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http::{Request, StatusCode};
use serde_json::{json, Value as Json};
use tempfile::TempDir;
use tower::ServiceExt as _; // for `oneshot`

use trend_missions::config::{AgentSeed, PipelineConfig};
use trend_missions::ingest::providers::{
    GithubTrendingCollector, HackerNewsCollector, TldrRssCollector,
};
use trend_missions::ingest::types::SourceCollector;
use trend_missions::metrics::Metrics;
use trend_missions::notify::NotifierMux;
use trend_missions::{router, Job, Pipeline};

const BODY_LIMIT: usize = 1024 * 1024;

fn fixture_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap()
}

fn collectors() -> Vec<Arc<dyn SourceCollector>> {
    vec![
        Arc::new(HackerNewsCollector::from_fixture(
            include_str!("fixtures/hn_topstories.json"),
            [
                (40001, include_str!("fixtures/hn_item_40001.json")),
                (40002, include_str!("fixtures/hn_item_40002.json")),
                (40003, include_str!("fixtures/hn_item_40003.json")),
            ],
        )),
        Arc::new(TldrRssCollector::from_fixture(include_str!("fixtures/tldr_rss.xml"))),
        Arc::new(GithubTrendingCollector::from_fixture(include_str!(
            "fixtures/github_search.json"
        ))),
    ]
}

fn test_pipeline(dir: &TempDir) -> Arc<Pipeline> {
    let mut cfg = PipelineConfig::default();
    cfg.storage.data_dir = dir.path().to_path_buf();
    cfg.missions.threshold = 50.0;
    cfg.agents = vec![AgentSeed {
        name: "ada".into(),
        specialization: "ai agents".into(),
    }];
    Arc::new(Pipeline::new(cfg, collectors(), NotifierMux::disabled()).expect("pipeline"))
}

/// Build the same Router the binary uses.
fn test_router(p: &Arc<Pipeline>) -> Router {
    router(Arc::clone(p), &Metrics::detached())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    send(app, req).await
}

async fn post_json(app: &Router, uri: &str, payload: Json) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST");
    send(app, req).await
}

fn as_json(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_pipeline(&dir));
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "OK");
}

#[tokio::test]
async fn trends_is_404_until_first_aggregation() {
    let dir = TempDir::new().unwrap();
    let p = test_pipeline(&dir);
    let app = test_router(&p);

    let (status, body) = get(&app, "/trends").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(as_json(&body)["error"].is_string());

    p.run_job(Job::Collect, fixture_now()).await.unwrap();
    p.run_job(Job::Aggregate, fixture_now()).await.unwrap();

    let (status, body) = get(&app, "/trends?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let v = as_json(&body);
    let trends = v["trends"].as_array().unwrap();
    assert_eq!(trends.len(), 1);
    assert_eq!(trends[0]["name"], "agents");
    assert_eq!(trends[0]["source_count"], 3);

    let (_, body) = get(&app, "/trends?category=security").await;
    let v = as_json(&body);
    for t in v["trends"].as_array().unwrap() {
        assert!(t["categories"].as_array().unwrap().iter().any(|c| c == "security"));
    }
}

#[tokio::test]
async fn register_agent_validates_and_rejects_duplicates() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_pipeline(&dir));

    let (status, body) = post_json(
        &app,
        "/agents",
        json!({ "name": "bob", "specialization": "security" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let v = as_json(&body);
    assert_eq!(v["name"], "bob");
    assert_eq!(v["performance_score"], 50.0);

    let (status, _) = post_json(&app, "/agents", json!({ "name": "bob" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_json(&app, "/agents", json!({ "name": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app, "/agents").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = as_json(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["ada", "bob"]);

    let (status, _) = get(&app, "/agents/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mission_completion_flow_over_http() {
    let dir = TempDir::new().unwrap();
    let p = test_pipeline(&dir);
    let app = test_router(&p);

    for job in Job::ALL {
        p.run_job(job, fixture_now()).await.unwrap();
    }

    let (status, body) = get(&app, "/missions?status=assigned&agent=ada").await;
    assert_eq!(status, StatusCode::OK);
    let assigned = as_json(&body);
    let list = assigned.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let id = list[0]["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("idea:"));

    let (status, body) = get(&app, &format!("/missions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["agent"], "ada");

    // wrong agent
    let (status, _) = post_json(
        &app,
        &format!("/missions/{id}/complete"),
        json!({ "agent": "bob", "quality_score": 80.0, "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // quality out of range
    let (status, _) = post_json(
        &app,
        &format!("/missions/{id}/complete"),
        json!({ "agent": "ada", "quality_score": 180.0, "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(
        &app,
        &format!("/missions/{id}/complete"),
        json!({
            "agent": "ada",
            "quality_score": 88.0,
            "success": true,
            "artifacts": [{ "path": "docs/investigations/agents.md" }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v = as_json(&body);
    assert_eq!(v["name"], "ada");
    assert_eq!(v["completed"], 1);
    assert_eq!(v["performance_score"], 88.0);

    // completing twice is a state conflict
    let (status, _) = post_json(
        &app,
        &format!("/missions/{id}/complete"),
        json!({ "agent": "ada", "quality_score": 88.0, "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = get(&app, "/agents/ada").await;
    let v = as_json(&body);
    assert_eq!(v["history"].as_array().unwrap().len(), 1);
    assert_eq!(v["history"][0]["mission_id"], id.as_str());

    let (status, body) = get(&app, "/hall-of-fame").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["entries"][0]["name"], "ada");

    let (status, body) = get(&app, "/hall-of-fame?format=md").await;
    assert_eq!(status, StatusCode::OK);
    let md = String::from_utf8(body).unwrap();
    assert!(md.starts_with("# Hall of Fame"));
    assert!(md.contains("| 1 | ada |"));
}

#[tokio::test]
async fn bad_mission_id_is_400_and_unknown_is_404() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_pipeline(&dir));

    let (status, _) = get(&app, "/missions/banana").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/missions/idea:404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn runs_lists_newest_first() {
    let dir = TempDir::new().unwrap();
    let p = test_pipeline(&dir);
    let app = test_router(&p);

    p.run_job(Job::Collect, fixture_now()).await.unwrap();
    p.run_job(Job::Assign, fixture_now()).await.unwrap();

    let (status, body) = get(&app, "/runs?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    let v = as_json(&body);
    let jobs: Vec<_> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["job"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(jobs, vec!["assign", "collect"]);
}

#[tokio::test]
async fn metrics_endpoint_is_mounted() {
    let dir = TempDir::new().unwrap();
    let app = test_router(&test_pipeline(&dir));
    let (status, _) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}
