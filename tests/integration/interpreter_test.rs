//! Job submission, cancellation and result formatting through the interpreter.

use std::time::Duration;

use super::common::open_mock;
use pretty_assertions::assert_eq;
use querystage::error::StageError;
use querystage::output::{MessageKind, QueryOutput};
use querystage::pipeline::SUCCESS_TEXT;
use querystage::session::MockQueryService;
use tempfile::TempDir;

#[tokio::test]
async fn test_cancel_before_start_delivers_nothing() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;

    let handle = interpreter.submit("p1", "select a from t;");
    assert!(interpreter.cancel("p1").await);
    assert!(!interpreter.cancel("p1").await);

    assert_eq!(handle.wait().await, Err(StageError::cancelled("p1")));
    assert_eq!(control.executions(), 0);
    assert_eq!(interpreter.registry().in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_stops_remaining_statements() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    control.set_delay(Duration::from_millis(200));
    let interpreter = open_mock(service, &tmp).await;

    let handle = interpreter.submit("p1", "select a from t; select b from t; select c from t;");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(interpreter.cancel("p1").await);
    assert!(handle.is_cancelled());
    assert!(handle.wait().await.is_err());

    // The statement already sent finishes; nothing after it is issued
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(control.executed(), vec!["select a from t;"]);
}

#[tokio::test]
async fn test_cancel_unknown_job_is_noop() {
    let tmp = TempDir::new().unwrap();
    let interpreter = open_mock(MockQueryService::new(), &tmp).await;

    assert!(!interpreter.cancel("never-submitted").await);
}

#[tokio::test]
async fn test_interpret_reports_cancellation_as_error_output() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    service.control().set_delay(Duration::from_millis(200));
    let interpreter = std::sync::Arc::new(open_mock(service, &tmp).await);

    let running = {
        let interpreter = std::sync::Arc::clone(&interpreter);
        tokio::spawn(async move { interpreter.interpret("p1", "select a from t;").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    interpreter.cancel("p1").await;

    let output = running.await.unwrap();
    assert_eq!(output, QueryOutput::error("Job cancelled: p1"));
}

#[tokio::test]
async fn test_jobs_with_distinct_ids_all_complete() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;

    let handles: Vec<_> = (0..5)
        .map(|i| interpreter.submit(format!("p{i}"), &format!("select {i} from t;")))
        .collect();
    for handle in handles {
        assert!(handle.wait().await.unwrap().is_success());
    }
    assert_eq!(control.executions(), 5);
    assert_eq!(interpreter.registry().in_flight(), 0);
}

#[tokio::test]
async fn test_statement_results_by_shape() {
    let tmp = TempDir::new().unwrap();
    let interpreter = open_mock(MockQueryService::new(), &tmp).await;

    let insert = interpreter
        .interpret("p1", "insert into t(key, a) values (1, 2);")
        .await;
    assert_eq!(insert, QueryOutput::text(SUCCESS_TEXT));

    let explain = interpreter.interpret("p2", "explain select a from t;").await;
    assert_eq!(
        explain.messages[0].data,
        "Logical Tree\tOperator Type\nProject\tProject\n--+--Select\tSelect\n----+--Scan\tScan\n"
    );

    let cluster = interpreter.interpret("p3", "show cluster info;").await;
    let titles: Vec<&str> = cluster
        .messages_of(MessageKind::Text)
        .map(|m| m.data.as_str())
        .collect();
    assert_eq!(titles, vec!["Server infos:", "Storage engine infos:"]);
    assert_eq!(cluster.messages_of(MessageKind::Table).count(), 2);
}

#[tokio::test]
async fn test_csv_load_from_local_file() {
    let tmp = TempDir::new().unwrap();
    let interpreter = open_mock(MockQueryService::new(), &tmp).await;
    let csv = tmp.path().join("points.csv");
    std::fs::write(&csv, "1,10\n2,20\n").unwrap();

    let output = interpreter
        .interpret(
            "p1",
            &format!(
                "load data from infile \"{}\" as csv into t(key, a);",
                csv.display()
            ),
        )
        .await;
    assert_eq!(
        output,
        QueryOutput::text("Successfully wrote 2 record(s) to: [key, a]")
    );
}

#[tokio::test]
async fn test_multiline_script_is_split() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    let interpreter = open_mock(service, &tmp).await;

    interpreter
        .interpret("p1", "select a\n\tfrom t;\n\nselect   b from u;\n")
        .await;
    assert_eq!(
        control.executed(),
        vec!["select a from t;", "select b from u;"]
    );
}

#[tokio::test]
async fn test_cancel_while_waiting_for_session_sends_nothing() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new();
    let control = service.control();
    control.set_delay(Duration::from_millis(200));
    let interpreter = open_mock(service, &tmp).await;

    let busy = interpreter.submit("p1", "select a from t;");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let waiting = interpreter.submit("p2", "select b from t;");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(interpreter.cancel("p2").await);
    assert!(waiting.wait().await.is_err());
    assert!(busy.wait().await.unwrap().is_success());
    assert_eq!(control.executed(), vec!["select a from t;"]);
}
