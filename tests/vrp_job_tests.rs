//! Integration tests for the optimization job submit/poll cycle.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geo_loadtest::config::VrpSettings;
use geo_loadtest::outcome::{OutcomeSink, RequestOutcome};
use geo_loadtest::requests::ApiTarget;
use geo_loadtest::vrp::{AsyncJobController, JobOutcome, JobStatus};

fn target(server: &MockServer, api_key: Option<&str>) -> ApiTarget {
    ApiTarget::new(
        reqwest::Client::new(),
        server.uri(),
        api_key.map(str::to_string),
        Duration::from_secs(3),
    )
}

fn drain(rx: &mut UnboundedReceiver<RequestOutcome>) -> Vec<RequestOutcome> {
    let mut outcomes = Vec::new();
    while let Ok(outcome) = rx.try_recv() {
        outcomes.push(outcome);
    }
    outcomes
}

async fn mount_submit(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/optimize"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "job_id": job_id })),
        )
        .mount(server)
        .await;
}

async fn solution_polls(server: &MockServer, job_id: &str) -> usize {
    let expected = format!("/solution/{}", job_id);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == expected)
        .count()
}

#[tokio::test]
async fn job_finishes_after_two_queued_polls() {
    let server = MockServer::start().await;
    mount_submit(&server, "J1").await;

    Mock::given(method("GET"))
        .and(path("/solution/J1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "queued" })),
        )
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/solution/J1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "finished" })),
        )
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, mut rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(1);

    let start = Instant::now();
    let outcome = controller.run(&mut rng, &CancellationToken::new()).await;
    let elapsed = start.elapsed();

    match outcome {
        JobOutcome::Finished(job) => {
            assert_eq!(job.job_id, "J1");
            assert_eq!(job.poll_count, 3);
            assert_eq!(job.status, JobStatus::Finished);
        }
        other => panic!("expected a finished job, got {:?}", other),
    }
    assert_eq!(solution_polls(&server, "J1").await, 3);
    assert!(
        elapsed >= Duration::from_millis(660),
        "two poll delays must elapse, got {:?}",
        elapsed
    );

    let outcomes = drain(&mut rx);
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].key(), "POST VRP complex Optimize");
    assert!(outcomes[1..]
        .iter()
        .all(|o| o.key() == "GET VRP complex Solution" && o.is_success()));
    for polls in outcomes[1..].windows(2) {
        let gap = polls[1].recorded_at.duration_since(polls[0].recorded_at);
        assert!(
            gap >= Duration::from_millis(330),
            "polls closer than the poll interval: {:?}",
            gap
        );
    }

    println!("✅ Job polled three times and finished");
}

#[tokio::test]
async fn http_400_stops_polling_after_one_call() {
    let server = MockServer::start().await;
    mount_submit(&server, "J400").await;

    Mock::given(method("GET"))
        .and(path("/solution/J400"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "message": "Job not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, mut rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(2);

    let outcome = controller.run(&mut rng, &CancellationToken::new()).await;
    match outcome {
        JobOutcome::PollFailed { job, error } => {
            assert_eq!(job.poll_count, 1);
            assert_eq!(job.status, JobStatus::Failed);
            assert!(error.to_string().contains("HTTP 400"));
        }
        other => panic!("expected a poll failure, got {:?}", other),
    }

    let outcomes = drain(&mut rx);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());
    assert_eq!(outcomes[1].status, Some(400));
}

#[tokio::test]
async fn submit_without_body_fails_and_never_polls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/optimize"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, mut rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(3);

    let outcome = controller.run(&mut rng, &CancellationToken::new()).await;
    match outcome {
        JobOutcome::SubmitFailed(error) => {
            assert_eq!(
                error.to_string(),
                "VRP optimize failed, there was no response."
            )
        }
        other => panic!("expected a submit failure, got {:?}", other),
    }

    let outcomes = drain(&mut rx);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].key(), "POST VRP complex Optimize");
    assert!(!outcomes[0].is_success());
}

#[tokio::test]
async fn submit_decode_and_missing_id_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/optimize"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/optimize"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "no-job-id" })),
        )
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, _rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(4);
    let cancel = CancellationToken::new();

    match controller.run(&mut rng, &cancel).await {
        JobOutcome::SubmitFailed(e) => assert!(e.to_string().contains("json decode error")),
        other => panic!("expected a decode failure, got {:?}", other),
    }
    match controller.run(&mut rng, &cancel).await {
        JobOutcome::SubmitFailed(e) => assert!(e.to_string().contains("no `job_id`")),
        other => panic!("expected a missing id failure, got {:?}", other),
    }
}

#[tokio::test]
async fn non_400_error_status_keeps_polling() {
    let server = MockServer::start().await;
    mount_submit(&server, "J503").await;

    Mock::given(method("GET"))
        .and(path("/solution/J503"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(serde_json::json!({ "status": "processing" })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/solution/J503"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "finished" })),
        )
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, mut rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(5);

    let outcome = controller.run(&mut rng, &CancellationToken::new()).await;
    assert!(outcome.is_finished());

    let outcomes = drain(&mut rx);
    assert_eq!(outcomes.len(), 3);
    assert!(!outcomes[1].is_success());
    assert_eq!(outcomes[1].status, Some(503));
    assert!(outcomes[2].is_success());
}

#[tokio::test]
async fn missing_status_is_terminal() {
    let server = MockServer::start().await;
    mount_submit(&server, "JX").await;
    Mock::given(method("GET"))
        .and(path("/solution/JX"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "x": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, _rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(6);

    match controller.run(&mut rng, &CancellationToken::new()).await {
        JobOutcome::PollFailed { error, .. } => {
            assert!(error.to_string().contains("no `status`"))
        }
        other => panic!("expected a poll failure, got {:?}", other),
    }
}

#[tokio::test]
async fn stop_signal_abandons_running_job() {
    let server = MockServer::start().await;
    mount_submit(&server, "JSLOW").await;
    Mock::given(method("GET"))
        .and(path("/solution/JSLOW"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": "processing" })),
        )
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings::default();
    let (sink, _rx) = OutcomeSink::channel(false);
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stopper.cancel();
    });

    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(7);
    let start = Instant::now();
    let outcome = controller.run(&mut rng, &cancel).await;

    assert!(matches!(outcome, JobOutcome::Cancelled(_)));
    assert!(start.elapsed() < Duration::from_secs(2));
    let polls = solution_polls(&server, "JSLOW").await;
    assert!((1..=3).contains(&polls), "unexpected poll count {}", polls);
}

#[tokio::test]
async fn poll_ceiling_ends_job() {
    let server = MockServer::start().await;
    mount_submit(&server, "JCAP").await;
    Mock::given(method("GET"))
        .and(path("/solution/JCAP"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "queued" })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let target = target(&server, None);
    let settings = VrpSettings {
        max_polls: Some(2),
        ..VrpSettings::default()
    };
    let (sink, _rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(8);

    match controller.run(&mut rng, &CancellationToken::new()).await {
        JobOutcome::PollLimitReached(job) => assert_eq!(job.poll_count, 2),
        other => panic!("expected the poll ceiling, got {:?}", other),
    }
}

#[tokio::test]
async fn api_key_is_appended_and_payload_is_well_formed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/optimize"))
        .and(query_param("key", "secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "job_id": "JK" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/solution/JK"))
        .and(query_param("key", "secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "finished" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let target = target(&server, Some("secret"));
    let settings = VrpSettings {
        max_profiles: 2,
        max_locations: 4,
        ..VrpSettings::default()
    };
    let (sink, _rx) = OutcomeSink::channel(false);
    let controller = AsyncJobController::new(&target, &settings, &sink);
    let mut rng = StdRng::seed_from_u64(9);

    assert!(controller
        .run(&mut rng, &CancellationToken::new())
        .await
        .is_finished());

    let requests = server.received_requests().await.unwrap();
    let submit = requests
        .iter()
        .find(|r| r.url.path() == "/optimize")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&submit.body).unwrap();
    assert_eq!(body["vehicles"].as_array().unwrap().len(), 2);
    assert_eq!(body["vehicle_types"].as_array().unwrap().len(), 2);
    assert_eq!(body["services"].as_array().unwrap().len(), 4);
}
