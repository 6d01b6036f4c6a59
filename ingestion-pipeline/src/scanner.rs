use std::path::Path;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            classification::SourceClassification,
            extracted_document::ExtractedDocument,
            file_change_record::FileChangeRecord,
            pipeline_message::PipelineMessage,
            pipeline_task::PipelineTask,
        },
    },
};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Counters for one pass over the library root.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub enqueued: usize,
    pub unchanged: usize,
    pub errors: usize,
}

/// Walks the library root, visiting each directory's files before its
/// subdirectories, and enqueues a crack task for every PDF that is new,
/// changed, or missing a usable extraction. The
/// change ledger (`FileChangeRecord`) is a durable cache keyed by path, so
/// repeated scans of an unchanged library enqueue nothing.
///
/// Per-file failures are logged and counted but never abort the walk; the
/// cancellation token is honored between files.
pub async fn scan_and_enqueue(
    root: &Path,
    db: &SurrealDbClient,
    shutdown: &CancellationToken,
) -> Result<ScanSummary, AppError> {
    let mut summary = ScanSummary::default();

    let walker = library_walker(root);

    for entry in walker {
        if shutdown.is_cancelled() {
            info!("scan cancelled; returning partial summary");
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "failed to read directory entry");
                summary.errors = summary.errors.saturating_add(1);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_pdf_extension(entry.path()) {
            continue;
        }

        summary.scanned = summary.scanned.saturating_add(1);

        match scan_file(root, entry.path(), db).await {
            Ok(FileDecision::Enqueued) => {
                summary.enqueued = summary.enqueued.saturating_add(1);
            }
            Ok(FileDecision::Unchanged) => {
                summary.unchanged = summary.unchanged.saturating_add(1);
            }
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "failed to scan file");
                summary.errors = summary.errors.saturating_add(1);
            }
        }
    }

    info!(
        scanned = summary.scanned,
        enqueued = summary.enqueued,
        unchanged = summary.unchanged,
        errors = summary.errors,
        "library scan finished"
    );

    Ok(summary)
}

/// Deterministic walk order: within each directory, files sorted by name
/// come before any subdirectory is entered, so loose files at the library
/// root drain first.
fn library_walker(root: &Path) -> walkdir::IntoIter {
    WalkDir::new(root)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
}

#[derive(Debug, Clone, Copy)]
enum FileDecision {
    Enqueued,
    Unchanged,
}

async fn scan_file(
    root: &Path,
    path: &Path,
    db: &SurrealDbClient,
) -> Result<FileDecision, AppError> {
    let file_path = path.to_string_lossy().into_owned();
    let relative_directory = relative_directory(root, path);

    let content_hash = hash_file(path).await?;
    let existing = FileChangeRecord::find_by_path(&file_path, db).await?;

    let needs_crack = match &existing {
        None => true,
        Some(record) if record.content_hash != content_hash => true,
        Some(record) => {
            // Hash unchanged. A record without a usable extraction means an
            // earlier crack never finished; re-enqueue without touching the
            // hash so the pipeline heals itself.
            if ExtractedDocument::has_successful_extraction(&file_path, db).await? {
                record.touch_scanned(db).await?;
                false
            } else {
                debug!(path = %file_path, "unchanged file lacks extraction; re-enqueueing");
                record.touch_scanned(db).await?;
                true
            }
        }
    };

    if !needs_crack {
        return Ok(FileDecision::Unchanged);
    }

    let classification = SourceClassification::from_relative_dir(&relative_directory);

    if existing.as_ref().map(|r| r.content_hash.as_str()) != Some(content_hash.as_str()) {
        FileChangeRecord::new(
            file_path.clone(),
            content_hash,
            classification.ruleset_tag,
            classification.document_kind,
        )
        .record_scan(db)
        .await?;
    }

    PipelineTask::enqueue(
        PipelineMessage::CrackDocument {
            file_path: file_path.clone(),
            relative_directory,
        },
        db,
    )
    .await?;

    debug!(path = %file_path, "enqueued crack task");
    Ok(FileDecision::Enqueued)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn relative_directory(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// SHA-256 over the full byte stream, hex-encoded. Timestamps are ignored by
/// design: only content moves the hash.
pub async fn hash_file(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
