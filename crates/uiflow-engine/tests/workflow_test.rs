mod common;

use common::{FakeBridge, Page, click, fast_config, fill, navigate, step};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uiflow_engine::error::ErrorKind;
use uiflow_engine::model::{AbortReason, OverallStatus, StepDefinition, StepStatus};
use uiflow_engine::otp::OneTimeCodes;
use uiflow_engine::process;
use uiflow_engine::session::SessionManager;
use uiflow_engine::workflow::WorkflowExecutor;
use uuid::Uuid;

fn login_steps() -> Vec<StepDefinition> {
    vec![
        step(3, "Submit", click("#submit")),
        step(1, "Open login", navigate("https://app.test/login")),
        step(2, "Enter email", fill("#email", "user@example.com")),
    ]
}

fn login_page() -> Page {
    Page::new("about:blank")
        .with_field("#email", "")
        .with_button("#submit", "https://app.test/home")
}

#[tokio::test]
async fn test_steps_run_in_index_order() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let bridge = FakeBridge::new(login_page());
    let run_id = Uuid::new_v4();

    let executor = WorkflowExecutor::new(&bridge, &config, OneTimeCodes::new(&config.otp))
        .unwrap()
        .with_run_id(run_id);
    let result = executor.run("12", &login_steps()).await;

    let order: Vec<u32> = result.steps.iter().map(|s| s.step_index).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(result.overall_status, OverallStatus::Passed);
    assert_eq!(result.run_id, run_id);
    assert_eq!(result.aborted, None);

    let paths = result.screenshot_paths();
    assert_eq!(paths.len(), 3);
    assert!(paths[0].contains(&format!("execution_{}", run_id)));
    assert!(paths[0].contains("TC12"));

    let summary = result.summary();
    assert_eq!((summary.total, summary.passed), (3, 3));
}

#[tokio::test]
async fn test_failed_step_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let bridge = FakeBridge::new(login_page());
    let steps = vec![
        step(1, "Open login", navigate("https://app.test/login")),
        step(2, "Enter phone", fill("#phone", "555")),
        step(3, "Enter email", fill("#email", "user@example.com")),
    ];

    let executor =
        WorkflowExecutor::new(&bridge, &config, OneTimeCodes::new(&config.otp)).unwrap();
    let result = executor.run("13", &steps).await;

    let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Passed]
    );
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(result.aborted, None);
    assert_eq!(bridge.field("#email").as_deref(), Some("user@example.com"));
}

#[tokio::test]
async fn test_skipped_steps_keep_run_passing() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let bridge = FakeBridge::new(login_page());
    let mut banner = step(2, "Dismiss banner", click("#banner-close"));
    banner.is_conditional = true;
    let steps = vec![step(1, "Open login", navigate("https://app.test/login")), banner];

    let executor =
        WorkflowExecutor::new(&bridge, &config, OneTimeCodes::new(&config.otp)).unwrap();
    let result = executor.run("14", &steps).await;

    assert_eq!(result.steps[1].status, StepStatus::Skipped);
    assert_eq!(result.overall_status, OverallStatus::Passed);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dead_session_aborts_run_and_is_released() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let manager = SessionManager::new(config.session.clone());
    let steps = vec![
        step(1, "Press one", click("#s1")),
        step(2, "Press two", click("#s2")),
        step(3, "Press three", click("#s3")),
        step(4, "Press four", click("#s4")),
    ];
    let mut browser = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = browser.id();
    let bridge = Arc::new(FakeBridge::new(Page {
        pids: vec![pid],
        ..Page::new("https://app.test/home")
    }));

    let result = manager
        .scoped(Arc::clone(&bridge), |session, handle| {
            let config = config.clone();
            async move {
                assert!(handle.connected);
                assert!(handle.process_ids.contains(&pid));
                session.set_down(true);
                let executor =
                    WorkflowExecutor::new(&**session, &config, OneTimeCodes::new(&config.otp))
                        .unwrap();
                executor.run("15", &steps).await
            }
        })
        .await
        .unwrap();

    assert_eq!(result.steps.len(), 3);
    assert_eq!(
        result.aborted,
        Some(AbortReason::SessionDead {
            after_step: 3,
            consecutive_failures: 3
        })
    );
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(
        result.steps[2].error.as_ref().unwrap().kind,
        ErrorKind::SessionDead
    );
    assert!(!bridge.calls().iter().any(|c| c.mentions("#s4")));
    assert_eq!(bridge.disconnects(), 1);
    // Released before `scoped` returned, so the process has already exited.
    assert!(!process::is_alive(pid));
    browser.wait().unwrap();
}

#[tokio::test]
async fn test_case_id_cannot_move_screenshots_out_of_root() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let bridge = FakeBridge::new(login_page());

    let executor =
        WorkflowExecutor::new(&bridge, &config, OneTimeCodes::new(&config.otp)).unwrap();
    let result = executor.run("/../../../escaped", &login_steps()).await;

    let paths = result.screenshot_paths();
    assert_eq!(paths.len(), 3);
    for path in paths {
        let written = std::fs::canonicalize(path).unwrap();
        assert!(written.starts_with(std::fs::canonicalize(&config.screenshots.root).unwrap()));
    }
}

#[tokio::test]
async fn test_cancelled_run_stops_before_first_step() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let bridge = FakeBridge::new(login_page());
    let token = CancellationToken::new();
    token.cancel();

    let executor = WorkflowExecutor::new(&bridge, &config, OneTimeCodes::new(&config.otp))
        .unwrap()
        .with_cancellation(token);
    let result = executor.run("16", &login_steps()).await;

    assert!(result.steps.is_empty());
    assert_eq!(result.aborted, Some(AbortReason::Cancelled { before_step: 1 }));
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert!(bridge.calls().is_empty());
}
