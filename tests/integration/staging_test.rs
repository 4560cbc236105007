//! Export staging through the interpreter.

use super::common::{byte_rows, open_mock, open_with, staged_folders, test_config};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pretty_assertions::assert_eq;
use querystage::output::MessageKind;
use querystage::session::MockQueryService;
use querystage::staging::ARCHIVE_NAME;
use tempfile::TempDir;

fn table_rows(output: &querystage::output::QueryOutput) -> Vec<String> {
    let table = output
        .messages_of(MessageKind::Table)
        .last()
        .expect("download table");
    table.data.lines().skip(1).map(String::from).collect()
}

#[tokio::test]
async fn test_two_files_have_no_archive_row() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new().with_export(
        "from t",
        &["key", "a", "b"],
        byte_rows(&[&["1", "x", "y"]]),
    );
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret("p1", r#"select a, b from t into outfile "/out" as stream;"#)
        .await;
    assert!(output.is_success(), "{:?}", output);

    let rows = table_rows(&output);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| !row.contains(ARCHIVE_NAME)));
    assert!(rows[0].starts_with("a\t"));
    assert!(rows[1].starts_with("b\t"));
}

#[tokio::test]
async fn test_three_files_add_archive_row_first() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new().with_export(
        "from t",
        &["key", "a", "b", "c"],
        byte_rows(&[&["1", "x", "y", "z"], &["2", "x", "y", "z"], &["3", "x", "y", "z"]]),
    );
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret("p1", r#"select a, b, c from t into outfile "/out" as stream;"#)
        .await;

    let rows = table_rows(&output);
    assert_eq!(rows.len(), 4);
    assert!(rows[0].contains(&format!("download=\"{ARCHIVE_NAME}\"")));

    let folders = staged_folders(&tmp);
    assert_eq!(folders.len(), 1);
    let folder = tmp.path().join("outfile").join(&folders[0]);
    assert!(folder.join(ARCHIVE_NAME).is_file());
    assert_eq!(std::fs::read(folder.join("a")).unwrap(), b"xxx");
    assert!(rows[0].contains(&format!(
        "http://localhost:18082/static/{}/{}",
        folders[0], ARCHIVE_NAME
    )));
}

#[tokio::test]
async fn test_seeded_folders_are_evicted_but_new_export_survives() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("outfile");
    for name in ["old-1", "old-2", "old-3"] {
        std::fs::create_dir_all(root.join(name)).unwrap();
        std::fs::write(root.join(name).join("data"), vec![0u8; 2048]).unwrap();
    }

    let mut config = test_config(&tmp);
    config.staging.max_folders = 1;
    let interpreter = open_with(MockQueryService::new(), config).await;
    assert_eq!(interpreter.staging().len().await, 3);

    let output = interpreter
        .interpret("p1", r#"select value from t into outfile "/out" as stream;"#)
        .await;
    assert!(output.is_success(), "{:?}", output);

    let folders = staged_folders(&tmp);
    assert_eq!(folders.len(), 1);
    assert!(!folders[0].starts_with("old-"));
    assert_eq!(interpreter.staging().len().await, 1);
}

#[tokio::test]
async fn test_inline_images() {
    let tmp = TempDir::new().unwrap();
    let png = [0x89u8, b'P', b'N', b'G'];
    let service = MockQueryService::new().with_export(
        "from images",
        &["key", "plot.png"],
        vec![vec![b"1".to_vec(), png.to_vec()]],
    );
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret(
            "p1",
            r#"select plot.png from images into outfile "/out" as stream showimg true;"#,
        )
        .await;

    assert_eq!(output.messages[0].kind, MessageKind::Text);
    assert_eq!(output.messages[0].data, "plot.png");
    assert_eq!(output.messages[1].kind, MessageKind::Img);
    assert_eq!(output.messages[1].data, STANDARD.encode(png));
    assert_eq!(output.messages[2].kind, MessageKind::Table);
}

#[tokio::test]
async fn test_images_not_inlined_without_showimg() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new().with_export(
        "from images",
        &["key", "plot.png"],
        vec![vec![b"1".to_vec(), b"img".to_vec()]],
    );
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret("p1", r#"select plot.png from images into outfile "/out" as stream;"#)
        .await;

    assert_eq!(output.messages_of(MessageKind::Img).count(), 0);
    assert_eq!(output.messages.len(), 1);
}

#[tokio::test]
async fn test_concurrent_exports_respect_count_budget() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.staging.max_folders = 2;
    let interpreter = std::sync::Arc::new(open_with(MockQueryService::new(), config).await);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            interpreter.submit(
                format!("p{i}"),
                r#"select value from t into outfile "/out" as stream;"#,
            )
        })
        .collect();
    for handle in handles {
        assert!(handle.wait().await.unwrap().is_success());
    }

    assert_eq!(staged_folders(&tmp).len(), 2);
    assert_eq!(interpreter.staging().len().await, 2);
}

#[tokio::test]
async fn test_failed_export_leaves_no_folder() {
    let tmp = TempDir::new().unwrap();
    let service = MockQueryService::new().with_parse_error("from missing", "table not found");
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret("p1", r#"select a from missing into outfile "/out" as stream;"#)
        .await;

    assert!(!output.is_success());
    assert!(output.contains("table not found"));
    assert!(staged_folders(&tmp).is_empty());
    assert_eq!(interpreter.staging().len().await, 0);
}

#[tokio::test]
async fn test_column_names_cannot_escape_the_export_folder() {
    let tmp = TempDir::new().unwrap();
    let victim = tmp.path().join("victim.txt");
    std::fs::write(&victim, "precious").unwrap();
    let victim_column = victim.to_string_lossy().into_owned();

    let service = MockQueryService::new().with_export(
        "from t",
        &["key", victim_column.as_str(), "../../escaped"],
        byte_rows(&[&["1", "OVERWRITTEN", "x"]]),
    );
    let interpreter = open_mock(service, &tmp).await;

    let output = interpreter
        .interpret("p1", r#"select v, w from t into outfile "/out" as stream;"#)
        .await;
    assert!(output.is_success(), "{:?}", output);

    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "precious");
    assert!(!tmp.path().join("escaped").exists());

    let folders = staged_folders(&tmp);
    let folder = tmp.path().join("outfile").join(&folders[0]);
    assert_eq!(std::fs::read(folder.join("_......escaped")).unwrap(), b"x");
    assert_eq!(table_rows(&output).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_image_exports_all_succeed() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.staging.max_folders = 1;
    let service = MockQueryService::new().with_export(
        "from images",
        &["key", "plot.png"],
        vec![vec![b"1".to_vec(), b"png-bytes".to_vec()]],
    );
    let interpreter = std::sync::Arc::new(open_with(service, config).await);

    for round in 0..5 {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                interpreter.submit(
                    format!("r{round}-p{i}"),
                    r#"select plot.png from images into outfile "/out" as stream showimg true;"#,
                )
            })
            .collect();

        for handle in handles {
            let output = handle.wait().await.unwrap();
            assert!(output.is_success(), "{:?}", output);
            assert_eq!(output.messages_of(MessageKind::Img).count(), 1);
            assert_eq!(output.messages_of(MessageKind::Table).count(), 1);
        }
    }

    // Only the folders kept for in-flight exports can exceed the budget
    assert!(staged_folders(&tmp).len() <= 2);
}
