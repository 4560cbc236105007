//! PostgreSQL backend integration tests.
//!
//! Skipped unless DATABASE_URL points at a reachable database.

use super::common::test_config;
use querystage::config::SessionConfig;
use querystage::interpreter::Interpreter;
use querystage::output::MessageKind;
use tempfile::TempDir;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to open an interpreter against the test database.
async fn get_test_interpreter(tmp: &TempDir) -> Option<Interpreter> {
    let url = get_test_database_url()?;
    let mut config = test_config(tmp);
    config.session = SessionConfig::from_connection_string(&url).ok()?;
    Interpreter::connect(&config).await.ok()
}

#[tokio::test]
async fn test_select_renders_table() {
    let tmp = TempDir::new().unwrap();
    let Some(interpreter) = get_test_interpreter(&tmp).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let output = interpreter
        .interpret("pg-1", "SELECT 1 AS num, 'hello' AS greeting;")
        .await;

    assert!(output.is_success(), "{:?}", output);
    assert_eq!(output.messages[0].kind, MessageKind::Table);
    assert_eq!(output.messages[0].data, "num\tgreeting\n1\thello\n");

    interpreter.close().await.unwrap();
}

#[tokio::test]
async fn test_syntax_error_is_reported_without_reopen() {
    let tmp = TempDir::new().unwrap();
    let Some(interpreter) = get_test_interpreter(&tmp).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let output = interpreter.interpret("pg-2", "SELEC 1;").await;

    assert!(!output.is_success());
    assert!(output.contains("syntax error"), "{:?}", output);

    let after = interpreter.interpret("pg-3", "SELECT 2 AS n;").await;
    assert!(after.is_success());

    interpreter.close().await.unwrap();
}

#[tokio::test]
async fn test_export_writes_column_files() {
    let tmp = TempDir::new().unwrap();
    let Some(interpreter) = get_test_interpreter(&tmp).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let output = interpreter
        .interpret(
            "pg-4",
            r#"SELECT 'a' AS x, 'b' AS y FROM generate_series(1, 3) INTO OUTFILE "/ignored" AS STREAM;"#,
        )
        .await;
    assert!(output.is_success(), "{:?}", output);

    let root = tmp.path().join("outfile");
    let folder = std::fs::read_dir(&root)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert_eq!(std::fs::read(folder.join("x")).unwrap(), b"aaa");
    assert_eq!(std::fs::read(folder.join("y")).unwrap(), b"bbb");

    interpreter.close().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_open_with_invalid_port_fails() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.session.host = "127.0.0.1".to_string();
    config.session.port = 1;

    let err = Interpreter::connect(&config).await.err().unwrap();
    assert_eq!(err.category(), "Connection Error");
}
