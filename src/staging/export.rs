//! Export statements: stream rows into per-column files and link them.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::cache::{ExportFolder, StagingCache};
use crate::error::{Result, StageError};
use crate::output::{MessageKind, QueryOutput};
use crate::script;
use crate::session::{ByteRow, ExportStream, SessionManager, KEY_COLUMN};

/// Name of the archive bundling all files of a multi-file export.
pub const ARCHIVE_NAME: &str = "all_file.zip";

/// URL path prefix under which the file server publishes the staging root.
pub const STATIC_PREFIX: &str = "static";

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff"];

/// Builds download links for staged files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLinks {
    host: String,
    port: u16,
}

impl DownloadLinks {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Uses the configured host, or the detected local address.
    pub fn resolve(advertised_host: Option<&str>, port: u16) -> Self {
        match advertised_host {
            Some(host) => Self::new(host, port),
            None => Self::new(local_address().to_string(), port),
        }
    }

    /// URL of `file` inside the export folder `folder`, percent-encoded.
    pub fn url(&self, folder: &str, file: &str) -> String {
        let base = format!("http://{}:{}/", self.host, self.port);
        match Url::parse(&base) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop_if_empty().extend([STATIC_PREFIX, folder, file]);
                }
                url.into()
            }
            Err(_) => format!("{base}{STATIC_PREFIX}/{folder}/{file}"),
        }
    }

    /// HTML anchor downloading `file`.
    pub fn anchor(&self, folder: &str, file: &str) -> String {
        format!(
            "%html<a href=\"{}\" download=\"{}\">Download</a>",
            self.url(folder, file),
            escape_attribute(file)
        )
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Address other hosts can reach this machine on; loopback if unknown.
///
/// Connecting a UDP socket sends nothing but makes the OS pick the outbound
/// interface.
fn local_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Runs export statements through the staging cache.
pub struct Exporter {
    cache: Arc<StagingCache>,
    fetch_size: usize,
    links: DownloadLinks,
}

impl Exporter {
    pub fn new(cache: Arc<StagingCache>, fetch_size: usize, links: DownloadLinks) -> Self {
        Self {
            cache,
            fetch_size: fetch_size.max(1),
            links,
        }
    }

    /// Executes an export statement into a fresh staging folder.
    ///
    /// The folder is registered (and older folders possibly evicted) once all
    /// files are written and any images read. It stays pinned until the
    /// output is built. The output lists inlined images, if requested, and a
    /// download table.
    pub async fn export(
        &self,
        session: &SessionManager,
        statement: &str,
        inline_images: bool,
        cancel: &CancellationToken,
    ) -> Result<QueryOutput> {
        let folder = self.cache.create_folder().await?;
        let target = folder.path.to_string_lossy().into_owned();
        let rewritten = script::rewrite_export_path(statement, &target);

        let staged = async {
            let files = self.stage(session, &rewritten, &folder, cancel).await?;
            let mut output = QueryOutput::success();
            if inline_images {
                push_images(&mut output, &folder.path, &files).await?;
            }
            Ok::<_, StageError>((files, output))
        }
        .await;

        let (files, mut output) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&folder.path).await {
                    warn!(
                        "Failed to remove abandoned folder {}: {}",
                        folder.path.display(),
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        self.cache.register(&folder.path).await?;
        info!(
            "Exported {} file(s) to {}",
            files.len(),
            folder.path.display()
        );

        output.push(MessageKind::Table, self.download_table(&folder.name, &files));
        self.cache.release(&folder.path).await;
        Ok(output)
    }

    /// Streams the rows to disk and bundles them; returns the column file names.
    async fn stage(
        &self,
        session: &SessionManager,
        statement: &str,
        folder: &ExportFolder,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut stream = session.export(statement, cancel).await?;
        write_stream(&mut *stream, self.fetch_size).await?;
        // Frees the session for other jobs
        drop(stream);

        let files = list_files(&folder.path).await?;
        if files.len() > 1 {
            bundle(&folder.path, &files).await?;
        }
        Ok(files)
    }

    /// Tab-separated table of download links; the archive comes first.
    pub fn download_table(&self, folder: &str, files: &[String]) -> String {
        let mut table = String::from("File Name\tDownload Link\n");
        if files.len() > 1 {
            table.push_str(&format!(
                "All files (zip)\t{}\n",
                self.links.anchor(folder, ARCHIVE_NAME)
            ));
        }
        for file in files {
            table.push_str(&format!("{}\t{}\n", file, self.links.anchor(folder, file)));
        }
        table
    }
}

/// Maps columns to destination files; the key column maps to `None`.
///
/// Every name becomes a single file name inside `dir`: path separators
/// become dots, hidden and empty names get a prefix, and repeated names get
/// `(1)`, `(2)`, ... suffixes.
pub fn column_files(dir: &Path, columns: &[String]) -> Result<Vec<Option<PathBuf>>> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    columns
        .iter()
        .map(|column| {
            if column == KEY_COLUMN {
                return Ok(None);
            }
            let name = file_name_for(column);
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;

            let file = if *count >= 2 {
                format!("{}({})", name, *count - 1)
            } else {
                name
            };

            let mut parts = Path::new(&file).components();
            match (parts.next(), parts.next()) {
                (Some(Component::Normal(_)), None) => Ok(Some(dir.join(file))),
                _ => Err(StageError::invalid_input(format!(
                    "Column {column:?} cannot be used as a file name"
                ))),
            }
        })
        .collect()
}

fn file_name_for(column: &str) -> String {
    let name: String = column
        .chars()
        .map(|c| match c {
            '\\' | '/' => '.',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if name.is_empty() {
        "column".to_string()
    } else if name.starts_with('.') || name == ARCHIVE_NAME {
        format!("_{name}")
    } else {
        name
    }
}

/// Appends every batch of the stream to its column files.
pub async fn write_stream(stream: &mut dyn ExportStream, fetch_size: usize) -> Result<()> {
    let dir = stream.dir().to_path_buf();
    match fs::metadata(&dir).await {
        Ok(meta) if !meta.is_dir() => {
            return Err(StageError::invalid_input(format!(
                "{} is not a directory!",
                dir.display()
            )))
        }
        Ok(_) => {}
        Err(_) => fs::create_dir_all(&dir).await?,
    }

    let targets = column_files(&dir, stream.columns())?;
    for path in targets.iter().flatten() {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
    }

    loop {
        let batch = stream.next_batch(fetch_size).await?;
        if batch.is_empty() {
            break;
        }
        append_batch(&targets, &batch).await?;
    }
    Ok(())
}

async fn append_batch(targets: &[Option<PathBuf>], batch: &[ByteRow]) -> Result<()> {
    for (i, target) in targets.iter().enumerate() {
        let Some(path) = target else {
            continue;
        };

        let mut buf = Vec::new();
        for row in batch {
            if let Some(value) = row.get(i) {
                buf.extend_from_slice(value);
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
    }
    Ok(())
}

/// Regular files directly inside `dir`, sorted by name.
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

/// Writes `all_file.zip` containing `files` into `dir`.
async fn bundle(dir: &Path, files: &[String]) -> Result<()> {
    let dir = dir.to_path_buf();
    let files = files.to_vec();

    tokio::task::spawn_blocking(move || write_archive(&dir, &files))
        .await
        .map_err(|e| StageError::internal(format!("Archive task failed: {e}")))?
}

fn write_archive(dir: &Path, files: &[String]) -> Result<()> {
    let archive = File::create(dir.join(ARCHIVE_NAME))?;
    let mut zip = ZipWriter::new(archive);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in files {
        zip.start_file(name.as_str(), options)
            .map_err(|e| StageError::staging(format!("Failed to add {name} to archive: {e}")))?;
        let mut source = File::open(dir.join(name))?;
        io::copy(&mut source, &mut zip)?;
    }

    let mut archive = zip
        .finish()
        .map_err(|e| StageError::staging(format!("Failed to finish archive: {e}")))?;
    archive.flush()?;
    Ok(())
}

fn is_image(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| ext.eq_ignore_ascii_case(i)))
}

/// Adds a file name and a base64 image message for every image file.
async fn push_images(output: &mut QueryOutput, dir: &Path, files: &[String]) -> Result<()> {
    for file in files.iter().filter(|f| is_image(f)) {
        let bytes = fs::read(dir.join(file)).await?;
        output.push(MessageKind::Text, file.clone());
        output.push(MessageKind::Img, STANDARD.encode(bytes));
    }
    Ok(())
}
