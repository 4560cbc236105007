//! Shared helpers for integration tests.

use querystage::config::Config;
use querystage::interpreter::Interpreter;
use querystage::session::MockQueryService;
use tempfile::TempDir;

/// Config staging into `tmp/outfile`, with a fixed advertised host.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.staging.dir = tmp.path().join("outfile");
    config.staging.advertised_host = Some("localhost".to_string());
    config.staging.fetch_size = 2;
    config
}

/// Opens an interpreter on `service` with [`test_config`].
pub async fn open_mock(service: MockQueryService, tmp: &TempDir) -> Interpreter {
    open_with(service, test_config(tmp)).await
}

pub async fn open_with(service: MockQueryService, config: Config) -> Interpreter {
    match Interpreter::open(&config, Box::new(service)).await {
        Ok(interpreter) => interpreter,
        Err(e) => panic!("interpreter failed to open: {e}"),
    }
}

/// Rows of byte values, one `Vec<u8>` per column.
pub fn byte_rows(rows: &[&[&str]]) -> Vec<Vec<Vec<u8>>> {
    rows.iter()
        .map(|row| row.iter().map(|v| v.as_bytes().to_vec()).collect())
        .collect()
}

/// Names of the folders directly under the staging root, sorted.
pub fn staged_folders(tmp: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(tmp.path().join("outfile"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
