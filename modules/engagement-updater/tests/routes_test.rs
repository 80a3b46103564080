//! HTTP surface, exercised in-process with `tower::ServiceExt::oneshot`.

mod harness;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use harness::{FakeBus, FakeMo, Health, ASSOCIATION_TYPE};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;
use uuid::Uuid;

use engagement_updater::routes::{router, AppState};
use engagement_updater::{
    AssociationPlanner, BoundedRunner, BulkJobs, Dispatcher, EngagementSource, JobStatus,
    Metrics, ReadinessAggregator,
};

struct TestApp {
    router: Router,
    mo: Arc<FakeMo>,
    bus: Arc<FakeBus>,
    jobs: BulkJobs,
    _shutdown: watch::Sender<bool>,
}

fn app() -> TestApp {
    app_with_metrics(None)
}

fn app_with_metrics(metrics: Option<Arc<Metrics>>) -> TestApp {
    let mo = FakeMo::new();
    let bus = FakeBus::new();
    let (shutdown, rx) = watch::channel(false);

    let planner = AssociationPlanner::new(mo.clone(), ASSOCIATION_TYPE);
    let dispatcher = Dispatcher::new(Arc::new(planner), mo.clone());
    let source = EngagementSource::new(mo.clone(), 2);
    let (jobs, _worker) = BulkJobs::start(
        source.clone(),
        dispatcher.clone(),
        BoundedRunner::new(2).unwrap(),
        1,
        8,
        Duration::from_secs(1),
        rx,
    );

    let state = Arc::new(AppState {
        service_name: "engagement_updater".to_string(),
        dispatcher,
        source,
        jobs: jobs.clone(),
        readiness: ReadinessAggregator::for_dependencies(bus.clone(), mo.clone(), mo.clone()),
        metrics,
    });

    TestApp {
        router: router(state),
        mo,
        bus,
        jobs,
        _shutdown: shutdown,
    }
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get_text(router: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn index_names_the_service() {
    let app = app();
    let (status, body) = send(&app.router, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "engagement_updater");
}

#[tokio::test]
async fn liveness_needs_no_dependencies() {
    let app = app();
    app.bus.healthy.store(false, Ordering::SeqCst);
    app.mo.set_query_health(Health::Failing);

    let (status, _) = send(&app.router, "GET", "/health/live").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn readiness_requires_every_dependency() {
    for bus_up in [true, false] {
        for query_up in [true, false] {
            for command_up in [true, false] {
                let app = app();
                app.bus.healthy.store(bus_up, Ordering::SeqCst);
                app.mo.set_query_health(if query_up { Health::Healthy } else { Health::Unhealthy });
                app.mo.set_command_health(if command_up { Health::Healthy } else { Health::Unhealthy });

                let (status, _) = send(&app.router, "GET", "/health/ready").await;

                let expected = if bus_up && query_up && command_up {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                assert_eq!(
                    status, expected,
                    "bus={bus_up} query={query_up} command={command_up}"
                );
            }
        }
    }
}

#[tokio::test]
async fn erroring_probe_counts_as_unhealthy() {
    let app = app();
    app.mo.set_command_health(Health::Failing);

    let (status, _) = send(&app.router, "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    app.mo.set_command_health(Health::Healthy);
    let (status, _) = send(&app.router, "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn trigger_one_writes_before_answering() {
    let app = app();
    let person = Uuid::new_v4();
    let engagement = app.mo.add_engagement(person, Uuid::new_v4());

    let (status, body) = send(&app.router, "POST", &format!("/trigger/{engagement}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(app.mo.writes().len(), 1);
    assert_eq!(app.mo.associations_of(person).len(), 1);
}

#[tokio::test]
async fn trigger_one_for_unknown_engagement_is_404() {
    let app = app();
    app.mo.add_engagement(Uuid::new_v4(), Uuid::new_v4());

    let (status, _) = send(&app.router, "POST", &format!("/trigger/{}", Uuid::new_v4())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.mo.writes().is_empty());
}

#[tokio::test]
async fn trigger_one_rejects_malformed_id() {
    let app = app();
    let (status, _) = send(&app.router, "POST", "/trigger/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn trigger_one_reports_upstream_failure() {
    let app = app();
    let engagement = app.mo.add_engagement(Uuid::new_v4(), Uuid::new_v4());
    app.mo.fail_commands(1);

    let (status, body) = send(&app.router, "POST", &format!("/trigger/{engagement}")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("CommandAPI"));
}

#[tokio::test]
async fn trigger_all_answers_before_the_work_is_done() {
    let app = app();
    let people: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for person in &people {
        app.mo.add_engagement(*person, Uuid::new_v4());
    }
    app.mo.set_write_delay(Duration::from_millis(200));

    let started = Instant::now();
    let (status, body) = send(&app.router, "POST", "/trigger/all").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "Background job triggered");
    assert!(started.elapsed() < Duration::from_millis(200));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let jobs = app.jobs.recent();
        if jobs.iter().any(|job| job.status == JobStatus::Finished) {
            assert_eq!(jobs[0].applied, 4);
            assert_eq!(jobs[0].failed, 0);
            break;
        }
        assert!(Instant::now() < deadline, "bulk job never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for person in &people {
        assert_eq!(app.mo.associations_of(*person).len(), 1);
    }
    assert!(app.mo.peak_in_flight() <= 2);
}

#[tokio::test]
async fn bulk_job_records_failures_and_continues() {
    let app = app();
    for _ in 0..3 {
        app.mo.add_engagement(Uuid::new_v4(), Uuid::new_v4());
    }
    app.mo.fail_commands(1);

    send(&app.router, "POST", "/trigger/all").await;

    let deadline = Instant::now() + Duration::from_secs(5);
    let job = loop {
        let (status, body) = send(&app.router, "GET", "/trigger/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let finished = body
            .as_array()
            .unwrap()
            .iter()
            .find(|job| job["status"] == "finished")
            .cloned();
        if let Some(job) = finished {
            break job;
        }
        assert!(Instant::now() < deadline, "bulk job never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(job["applied"], 2);
    assert_eq!(job["failed"], 1);
    assert_eq!(job["failed_engagements"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_bulk_triggers_coalesce() {
    let app = app();
    app.mo.add_engagement(Uuid::new_v4(), Uuid::new_v4());

    // No await between triggers, so the worker has not picked anything up yet.
    let outcomes: Vec<_> = (0..3).map(|_| app.jobs.trigger()).collect();

    assert!(matches!(outcomes[0], engagement_updater::Trigger::Queued(_)));
    assert_eq!(outcomes[1], engagement_updater::Trigger::Coalesced);
    assert_eq!(outcomes[2], engagement_updater::Trigger::Coalesced);
    assert_eq!(app.jobs.recent().len(), 1);
}

#[tokio::test]
async fn metrics_report_build_and_requests_per_route() {
    let app = app_with_metrics(Some(Arc::new(Metrics::new("1.0.0", "cafebabe"))));
    send(&app.router, "GET", "/").await;
    send(&app.router, "POST", &format!("/trigger/{}", Uuid::new_v4())).await;
    send(&app.router, "POST", &format!("/trigger/{}", Uuid::new_v4())).await;

    let (status, content_type, text) = get_text(&app.router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert!(text.contains("build_information_info{hash=\"cafebabe\",version=\"1.0.0\"} 1"));
    assert!(text.contains("http_requests_total{handler=\"/\",method=\"GET\",status=\"200\"} 1"));
    assert!(text.contains(
        "http_requests_total{handler=\"/trigger/{id}\",method=\"POST\",status=\"404\"} 2"
    ));
}

#[tokio::test]
async fn metrics_are_absent_when_switched_off() {
    let app = app();
    let (status, _, _) = get_text(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
