//! Transport failure recovery through the interpreter.

use super::common::open_mock;
use querystage::pipeline::{EXECUTION_ERROR_PREFIX, REOPEN_FAILED_MESSAGE};
use querystage::session::{MockQueryService, SessionState};
use tempfile::TempDir;

#[tokio::test]
async fn test_transport_failure_reopens_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;
    control.inject_transport_failures(1);

    let output = interpreter.interpret("p1", "select a from t;").await;

    assert!(output.is_success());
    assert_eq!(control.opens(), 2);
    assert_eq!(control.closes(), 1);
    assert_eq!(control.executions(), 2);
}

#[tokio::test]
async fn test_failed_reopen_reports_and_later_statements_still_run() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;
    control.inject_transport_failures(1);
    control.set_open_fails(true);

    let first = interpreter.interpret("p1", "select a from t;").await;
    assert!(!first.is_success());
    assert!(first.messages[0].data.starts_with(EXECUTION_ERROR_PREFIX));
    assert_eq!(first.messages.last().unwrap().data, REOPEN_FAILED_MESSAGE);
    assert_eq!(
        interpreter.session().state().await,
        SessionState::Closed
    );

    // The service comes back; the next statement reopens on its own
    control.set_open_fails(false);
    let second = interpreter.interpret("p2", "select b from t;").await;
    assert!(second.is_success(), "{:?}", second);
    assert_eq!(
        interpreter.session().state().await,
        SessionState::Open
    );
}

#[tokio::test]
async fn test_failed_reopen_does_not_stop_the_script() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;
    control.inject_transport_failures(1);
    control.fail_next_opens(1);

    let output = interpreter
        .interpret("p1", "select a from t; select b from t;")
        .await;

    // The second statement finds the session closed and reopens it itself
    assert!(output.is_success(), "{:?}", output);
    assert!(output.contains("select b from t;"));
    assert_eq!(
        control.executed(),
        vec!["select a from t;", "select b from t;"]
    );
    assert_eq!(control.opens(), 3);
    assert_eq!(
        interpreter.session().state().await,
        SessionState::Open
    );
}

#[tokio::test]
async fn test_recovery_applies_per_statement() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;
    control.inject_transport_failures(1);

    let output = interpreter
        .interpret("p1", "select a from t;\nselect b from t;\nselect c from t;")
        .await;

    assert!(output.is_success());
    assert!(output.contains("select c from t;"));
    assert_eq!(
        control.executed(),
        vec![
            "select a from t;",
            "select a from t;",
            "select b from t;",
            "select c from t;"
        ]
    );
}

#[tokio::test]
async fn test_parse_errors_are_not_retried() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new().with_parse_error("selct", "mismatched input 'selct'");
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter.interpret("p1", "selct * from t;").await;

    assert!(!output.is_success());
    assert_eq!(output.messages[0].data, "mismatched input 'selct'");
    assert_eq!(control.executions(), 1);
    assert_eq!(control.opens(), 1);
}
