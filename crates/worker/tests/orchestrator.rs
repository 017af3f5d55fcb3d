//! End-to-end runs through the orchestrator with a fake engine.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use assert_matches::assert_matches;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{orchestrator, test_config, FakeEngine};
use deforum_core::CoreError;
use deforum_engine::executor::STATUS_TIMEOUT;
use deforum_engine::EngineApi;
use deforum_events::{JobEvent, MemorySink};

async fn run(engine: FakeEngine, extra: &[(&str, &str)], input: Value) -> (Value, Arc<MemorySink>) {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(test_config(dir.path(), extra), engine, Arc::clone(&sink), None);
    let response = orch.handle(&json!({ "input": input })).await.unwrap();
    (serde_json::to_value(&response).unwrap(), sink)
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_run_picks_the_rendered_video() {
    let (value, _) = run(FakeEngine::rendering(), &[], json!({"prompt": "a fox"})).await;

    assert_eq!(value["status"], "completed");
    let result = &value["result"];
    assert_eq!(result["ok"], true);
    assert_eq!(result["mode"], "fake");
    assert_eq!(result["run_id"].as_str().unwrap().len(), 8);
    assert!(result["picked_file"].as_str().unwrap().ends_with("clip.mp4"));
    assert!(result["local_outdir"].as_str().unwrap().ends_with("out"));
    assert_eq!(result["uploaded"]["ok"], false);
    assert_eq!(result["uploaded"]["reason"], "skipped");
    assert!(result.get("failure").is_none());
    assert!(result.get("launch_tail").is_none());
    assert!(result.get("job").is_none());

    let steps: Vec<&str> = result["timings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["step"].as_str().unwrap())
        .collect();
    assert_eq!(steps, vec!["build", "execute", "locate", "upload"]);
}

#[tokio::test]
async fn clean_exit_without_video_is_artifact_not_found() {
    let (value, _) = run(FakeEngine::failing(0, "no frames"), &[], json!({})).await;

    assert_eq!(value["status"], "failed");
    assert_eq!(value["result"]["ok"], false);
    assert_eq!(value["result"]["failure"], "artifact_not_found");
    assert_eq!(value["result"]["picked_file"], Value::Null);
    assert!(value["result"].get("launch_tail").is_none());
}

#[tokio::test]
async fn failed_execution_includes_output_tail() {
    let engine = FakeEngine::failing(1, "Traceback: CUDA out of memory");
    let (value, _) = run(engine, &[], json!({})).await;

    assert_eq!(value["status"], "failed");
    assert_eq!(value["result"]["failure"], "execution_failure");
    assert!(value["result"]["launch_tail"]
        .as_str()
        .unwrap()
        .contains("CUDA out of memory"));
}

#[tokio::test]
async fn timeout_is_classified_separately() {
    let engine = FakeEngine::failing(STATUS_TIMEOUT, "rendering frame 3");
    let (value, _) = run(engine, &[], json!({})).await;

    assert_eq!(value["result"]["failure"], "execution_timeout");
    assert!(value["result"]["launch_tail"]
        .as_str()
        .unwrap()
        .ends_with("[TIMEOUT]"));
}

#[tokio::test]
async fn stale_videos_are_ignored_when_fresh_only() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("previous.mp4");
    std::fs::write(&old, b"old").unwrap();
    let file = std::fs::File::options().write(true).open(&old).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();

    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(
        test_config(dir.path(), &[]),
        FakeEngine::failing(0, ""),
        Arc::clone(&sink),
        None,
    );
    let response = orch.handle(&json!({"input": {}})).await.unwrap();
    assert!(response.result.picked_file.is_none());

    let orch = orchestrator(
        test_config(dir.path(), &[("DEFORUM_FRESH_ONLY", "false")]),
        FakeEngine::failing(0, ""),
        sink,
        None,
    );
    let response = orch.handle(&json!({"input": {}})).await.unwrap();
    assert_eq!(response.result.picked_file.as_deref(), Some(old.as_path()));
    assert!(response.result.ok);
}

// ---------------------------------------------------------------------------
// Validation and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_input_fails_after_start_and_end_events() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let engine = FakeEngine::rendering();
    let seen = Arc::clone(&engine.seen);
    let orch = orchestrator(test_config(dir.path(), &[]), engine, Arc::clone(&sink), None);

    let err = orch
        .handle(&json!({"input": {"width": "wide"}}))
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::Validation { ref field, .. } if field == "width");
    assert!(seen.lock().unwrap().is_none(), "engine must not run");

    let events = sink.events();
    assert_eq!(events.first().map(|e| e.kind()), Some("start"));
    assert_matches!(
        events.last(),
        Some(JobEvent::End { ok: false, artifact_found: false, .. })
    );
    assert_eq!(sink.of_kind("end").len(), 1);
}

#[tokio::test]
async fn run_emits_start_timings_and_end() {
    let (value, sink) = run(FakeEngine::rendering(), &[], json!({"prompt": "x", "seed": 3})).await;
    let run_id = value["result"]["run_id"].as_str().unwrap().to_string();

    let events = sink.events();
    assert_matches!(
        events.first(),
        Some(JobEvent::Start { input_keys, .. })
            if input_keys == &vec!["prompt".to_string(), "seed".to_string()]
    );
    assert_matches!(
        events.last(),
        Some(JobEvent::End { ok: true, artifact_found: true, .. })
    );
    assert!(events.iter().all(|e| e.run_id() == run_id));

    let phases: Vec<String> = sink
        .of_kind("timing")
        .into_iter()
        .filter_map(|e| match e {
            JobEvent::Timing { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec!["build", "execute", "locate", "upload"]);
}

// ---------------------------------------------------------------------------
// Job construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debug_includes_the_job_sent_to_the_engine() {
    let (value, _) = run(
        FakeEngine::rendering(),
        &[],
        json!({"prompt": "a fox", "debug": true, "zoom": 1.02}),
    )
    .await;

    let job = &value["result"]["job"];
    assert_eq!(job["prompt"]["0"], "a fox");
    assert_eq!(job["W"], 512);
    assert_eq!(job["zoom"], "0:(1.02)");
    assert!(job.get("controlnet_args").is_none());
}

#[tokio::test]
async fn request_timeout_bounds_the_engine_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::rendering();
    let seen = Arc::clone(&engine.seen);
    let orch = orchestrator(
        test_config(dir.path(), &[]),
        engine,
        Arc::new(MemorySink::new()),
        None,
    );

    orch.handle(&json!({"input": {"timeout_ms": 5000}}))
        .await
        .unwrap();

    let remaining = seen.lock().unwrap().as_ref().unwrap().remaining;
    assert!(remaining <= Duration::from_secs(5));
    assert!(remaining > Duration::ZERO);
}

#[tokio::test]
async fn request_timeout_cannot_exceed_the_job_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::rendering();
    let seen = Arc::clone(&engine.seen);
    let orch = orchestrator(
        test_config(dir.path(), &[("DEFORUM_JOB_TIMEOUT", "1")]),
        engine,
        Arc::new(MemorySink::new()),
        None,
    );

    orch.handle(&json!({"input": {"timeout_ms": 600_000}}))
        .await
        .unwrap();

    let remaining = seen.lock().unwrap().as_ref().unwrap().remaining;
    assert!(remaining <= Duration::from_secs(1));
}

#[tokio::test]
async fn controlnet_names_resolve_against_engine_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/controlnet/model_list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"model_list": ["control_sd15_animal_openpose_fp16 [a1b2c3d4]"]}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/controlnet/module_list"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"module_list": ["openpose_full"]})),
        )
        .mount(&server)
        .await;

    let engine = FakeEngine::rendering();
    let seen = Arc::clone(&engine.seen);
    let orch = orchestrator(
        test_config(dir.path(), &[]),
        engine,
        Arc::new(MemorySink::new()),
        Some(EngineApi::new(server.uri())),
    );
    orch.handle(&json!({"input": {"controlnet": {"enabled": true}}}))
        .await
        .unwrap();

    let job = seen.lock().unwrap().as_ref().unwrap().job.clone();
    let cn = job.controlnet_args.expect("controlnet block");
    assert_eq!(cn.model, "control_sd15_animal_openpose_fp16 [a1b2c3d4]");
    assert_eq!(cn.module, "openpose_full");
}

#[tokio::test]
async fn unreachable_catalog_falls_back_to_default_names() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::rendering();
    let seen = Arc::clone(&engine.seen);
    let orch = orchestrator(
        test_config(dir.path(), &[("CONTROLNET_MODEL", "my_model")]),
        engine,
        Arc::new(MemorySink::new()),
        Some(EngineApi::new("http://127.0.0.1:1")),
    );
    let response = orch
        .handle(&json!({"input": {"controlnet_enabled": true}}))
        .await
        .unwrap();

    assert!(response.result.ok);
    let job = seen.lock().unwrap().as_ref().unwrap().job.clone();
    assert_eq!(job.controlnet_args.expect("controlnet block").model, "my_model");
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requested_upload_stores_under_run_key() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"url": "https://cdn.example.com/clip.mp4"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let (value, _) = run(
        FakeEngine::rendering(),
        &[("VERCEL_BLOB_BASE", uri.as_str()), ("VERCEL_BLOB_RW_TOKEN", "rw")],
        json!({"upload": true}),
    )
    .await;

    let result = &value["result"];
    let run_id = result["run_id"].as_str().unwrap();
    assert_eq!(result["uploaded"]["ok"], true);
    assert_eq!(result["uploaded"]["url"], "https://cdn.example.com/clip.mp4");
    assert_eq!(result["uploaded"]["transport"], "direct_put");
    assert_eq!(result["uploaded"]["key"], format!("runs/{run_id}/clip.mp4"));
}

#[tokio::test]
async fn failed_upload_does_not_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage down"))
        .mount(&server)
        .await;

    let uri = server.uri();
    let (value, _) = run(
        FakeEngine::rendering(),
        &[("VERCEL_BLOB_BASE", uri.as_str()), ("VERCEL_BLOB_RW_TOKEN", "rw")],
        json!({"upload": true}),
    )
    .await;

    assert_eq!(value["status"], "completed");
    assert_eq!(value["result"]["ok"], true);
    assert_eq!(value["result"]["uploaded"]["ok"], false);
    assert_eq!(value["result"]["uploaded"]["reason"], "all_attempts_failed");
    assert_eq!(value["result"]["uploaded"]["attempts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn upload_stops_at_the_run_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let uri = server.uri();
    let started = Instant::now();
    let (value, sink) = run(
        FakeEngine::rendering(),
        &[("VERCEL_BLOB_BASE", uri.as_str()), ("VERCEL_BLOB_RW_TOKEN", "rw")],
        json!({"upload": true, "timeout_ms": 300}),
    )
    .await;

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(value["result"]["ok"], true);
    let uploaded = &value["result"]["uploaded"];
    assert_eq!(uploaded["reason"], "all_attempts_failed");
    let attempts = uploaded["attempts"].as_array().unwrap();
    assert_eq!(
        attempts.last().unwrap()["error"],
        deforum_cloud::outcome::DEADLINE_EXPIRED
    );
    assert_eq!(sink.of_kind("end").len(), 1);
}

#[tokio::test]
async fn upload_without_credentials_is_missing_env() {
    let (value, _) = run(FakeEngine::rendering(), &[], json!({"upload": true})).await;
    assert_eq!(value["result"]["ok"], true);
    assert_eq!(value["result"]["uploaded"]["reason"], "missing_env");
}

#[tokio::test]
async fn env_seen_never_leaks_values() {
    let (value, _) = run(
        FakeEngine::rendering(),
        &[("VERCEL_BLOB_RW_TOKEN", "super-secret")],
        json!({}),
    )
    .await;

    let seen = &value["result"]["env_seen"];
    assert_eq!(seen["blob_token_set"], true);
    assert_eq!(seen["blob_base_set"], false);
    assert!(seen.as_object().unwrap().values().all(Value::is_boolean));
    assert!(!value.to_string().contains("super-secret"));
}
