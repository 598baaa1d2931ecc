//! Streaming ZIP archive generation.
//!
//! Documents are fetched with at most `fetch_concurrency` requests in flight
//! and handed to a ZIP writer running on a blocking thread through a bounded
//! channel. When the writer falls behind the channel fills up and no further
//! fetches are started until it drains, so memory use is bounded by the
//! channel capacity plus the in-flight fetches.
//!
//! A document that cannot be fetched is replaced by a short text entry
//! explaining why; only writer failures abort the archive.

use chrono::{DateTime, Utc};
use domain::error::FetchError;
use domain::models::{
    ArchiveEntry, DocumentRef, ExportJob, PLACEHOLDER_SUFFIX, PROGRESS_ARCHIVED,
    PROGRESS_SELECTED,
};
use domain::services::{FileStore, ProgressUpdate};
use futures::stream::{self, StreamExt};
use metrics::counter;
use shared::validation::{sanitize_filename, split_extension};
use std::collections::{BTreeMap, HashSet};
use std::io::{Seek, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ExportConfig;

/// Name of the generated listing, always the first entry of an archive.
pub const INDEX_ENTRY_NAME: &str = "INDEX.txt";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive generation cancelled")]
    Cancelled,

    #[error("Archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive writer stopped unexpectedly: {0}")]
    WriterAborted(String),
}

/// Entry compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCompression {
    Stored,
    Deflated { level: Option<i64> },
}

impl ArchiveCompression {
    /// Maps the configured name; anything but `stored` deflates.
    pub fn from_config(name: &str, level: Option<i64>) -> Self {
        match name {
            "stored" => ArchiveCompression::Stored,
            _ => ArchiveCompression::Deflated { level },
        }
    }

    fn file_options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        match *self {
            // Deflate has no level 0; the writer rejects it.
            ArchiveCompression::Stored | ArchiveCompression::Deflated { level: Some(0) } => {
                options.compression_method(CompressionMethod::Stored)
            }
            ArchiveCompression::Deflated { level } => options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(level),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub fetch_concurrency: usize,
    pub fetch_timeout: Duration,
    /// Capacity of the channel between fetchers and the writer.
    pub write_buffer: usize,
    pub compression: ArchiveCompression,
}

impl From<&ExportConfig> for ArchiveOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            fetch_concurrency: config.fetch_concurrency.max(1),
            fetch_timeout: config.fetch_timeout(),
            write_buffer: config.write_buffer_entries.max(1),
            compression: ArchiveCompression::from_config(
                &config.compression,
                config.compression_level,
            ),
        }
    }
}

/// Counts reported once the archive has been finalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveSummary {
    /// Entries written, index and placeholders included.
    pub entries_written: usize,
    pub processed_documents: i64,
    pub failed_documents: i64,
    /// One line per document replaced by a placeholder.
    pub warnings: Vec<String>,
}

/// One file queued for the writer thread.
struct PendingEntry {
    path: String,
    bytes: Vec<u8>,
}

enum FeedOutcome {
    Done(ArchiveSummary),
    Cancelled,
    WriterGone,
}

/// Computes collision-free archive paths for the selected documents.
///
/// Documents are grouped by citizen and then by request
/// (`citizen_<id>/request_<id>/`, or `citizen_<id>/general/` for documents
/// not attached to a request). Selection order is preserved.
///
/// Document paths are reserved first; placeholder paths are then chosen
/// around them, so a stored file that happens to be named like a
/// placeholder keeps its name and the placeholder moves instead.
pub fn build_entries(documents: &[DocumentRef]) -> Vec<ArchiveEntry> {
    // Compared case-insensitively so extraction on case-insensitive
    // filesystems cannot overwrite entries.
    let mut used: HashSet<String> = HashSet::with_capacity(documents.len() * 2);

    let paths: Vec<String> = documents
        .iter()
        .map(|doc| {
            let dir = match doc.request_id {
                Some(request_id) => format!("citizen_{}/request_{}/", doc.citizen_id, request_id),
                None => format!("citizen_{}/general/", doc.citizen_id),
            };
            let file_name = entry_file_name(doc);
            let (stem, ext) = split_extension(&file_name);

            let mut candidate = format!("{}{}", dir, file_name);
            let mut n = 1;
            while !used.insert(candidate.to_lowercase()) {
                candidate = match ext {
                    Some(ext) => format!("{}{} ({}).{}", dir, stem, n, ext),
                    None => format!("{}{} ({})", dir, stem, n),
                };
                n += 1;
            }
            candidate
        })
        .collect();

    documents
        .iter()
        .zip(paths)
        .map(|(doc, archive_path)| {
            let mut placeholder_path = format!("{}{}", archive_path, PLACEHOLDER_SUFFIX);
            let mut n = 1;
            while !used.insert(placeholder_path.to_lowercase()) {
                placeholder_path = format!("{} ({}){}", archive_path, n, PLACEHOLDER_SUFFIX);
                n += 1;
            }

            ArchiveEntry {
                document: doc.clone(),
                archive_path,
                placeholder_path,
                declared_size: doc.size_bytes.max(0),
            }
        })
        .collect()
}

fn entry_file_name(doc: &DocumentRef) -> String {
    let name = sanitize_filename(&doc.original_filename);
    if split_extension(&name).1.is_some() {
        return name;
    }

    match mime_guess::get_mime_extensions_str(&doc.mime_type).and_then(|exts| exts.first()) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

/// Renders the plain-text listing written as the first archive entry.
pub fn render_index(job: &ExportJob, entries: &[ArchiveEntry], generated_at: DateTime<Utc>) -> String {
    let mut groups: BTreeMap<&str, Vec<&ArchiveEntry>> = BTreeMap::new();
    for entry in entries {
        let group = entry
            .archive_path
            .rsplit_once('/')
            .map_or("", |(dir, _)| dir);
        groups.entry(group).or_default().push(entry);
    }
    let total_bytes: i64 = entries.iter().map(|e| e.declared_size).sum();

    let mut out = String::new();
    out.push_str(&format!("Document export {}\n", job.id));
    out.push_str(&format!("Generated: {}\n", generated_at.to_rfc3339()));
    out.push_str(&format!("Requested by: {}\n", job.user_id));
    out.push_str(&format!("Documents: {}\n", entries.len()));
    out.push_str(&format!("Groups: {}\n", groups.len()));
    out.push_str(&format!("Declared size: {} bytes\n", total_bytes));

    for (group, members) in &groups {
        let group_bytes: i64 = members.iter().map(|e| e.declared_size).sum();
        out.push_str(&format!(
            "\n{}/ ({} documents, {} bytes)\n",
            group,
            members.len(),
            group_bytes
        ));
        for entry in members {
            let name = entry
                .archive_path
                .rsplit_once('/')
                .map_or(entry.archive_path.as_str(), |(_, name)| name);
            let doc = &entry.document;
            out.push_str(&format!(
                "  {}  {}  {} bytes  {}{}  id={}\n",
                name,
                doc.document_type,
                entry.declared_size,
                doc.created_at.format("%Y-%m-%d"),
                if doc.verified { "  verified" } else { "" },
                doc.id
            ));
        }
    }

    out.push_str(&format!(
        "\nDocuments that could not be retrieved appear as '<name>{}'.\n",
        PLACEHOLDER_SUFFIX
    ));
    out
}

fn placeholder_text(entry: &ArchiveEntry, error: &FetchError) -> String {
    format!(
        "Document {} could not be included in this export.\n\
         Original file name: {}\n\
         Document type: {}\n\
         Reason: {}\n",
        entry.document.id, entry.document.original_filename, entry.document.document_type, error
    )
}

fn fetch_outcome_label(error: &FetchError) -> &'static str {
    match error {
        FetchError::NotFound(_) => "not_found",
        FetchError::Timeout(_) => "timeout",
        _ => "error",
    }
}

/// Maps the share of attempted entries into the archiving progress band.
pub fn archive_percent(attempted: usize, total: usize) -> i32 {
    if total == 0 {
        return PROGRESS_ARCHIVED;
    }
    let band = (PROGRESS_ARCHIVED - PROGRESS_SELECTED) as usize;
    PROGRESS_SELECTED + (band * attempted.min(total) / total) as i32
}

fn spawn_writer<W>(
    sink: W,
    mut rx: mpsc::Receiver<PendingEntry>,
    options: SimpleFileOptions,
    cancel: CancellationToken,
) -> JoinHandle<Result<(W, usize), ArchiveError>>
where
    W: Write + Seek + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut zip = ZipWriter::new(sink);
        let mut written = 0usize;

        while let Some(entry) = rx.blocking_recv() {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            zip.start_file(entry.path, options)?;
            zip.write_all(&entry.bytes)?;
            written += 1;
        }

        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let mut sink = zip.finish()?;
        sink.flush()?;
        Ok((sink, written))
    })
}

/// Writes archives for export jobs.
pub struct ArchiveGenerator {
    store: Arc<dyn FileStore>,
    options: ArchiveOptions,
}

impl ArchiveGenerator {
    pub fn new(store: Arc<dyn FileStore>, options: ArchiveOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Streams every entry into a ZIP archive written to `sink`.
    ///
    /// The index is written first; every entry is attempted before the
    /// archive is finalized. Progress is published after each attempted
    /// entry. Returns the finalized sink.
    pub async fn generate<W>(
        &self,
        job: &ExportJob,
        entries: Vec<ArchiveEntry>,
        sink: W,
        cancel: &CancellationToken,
        progress: &watch::Sender<ProgressUpdate>,
    ) -> Result<(W, ArchiveSummary), ArchiveError>
    where
        W: Write + Seek + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let index = render_index(job, &entries, Utc::now());
        let (tx, rx) = mpsc::channel(self.options.write_buffer.max(1));
        let writer = spawn_writer(
            sink,
            rx,
            self.options.compression.file_options(),
            cancel.clone(),
        );

        let outcome = self.feed(job.id, entries, index, &tx, cancel, progress).await;
        drop(tx);

        let written = writer
            .await
            .map_err(|e| ArchiveError::WriterAborted(e.to_string()))?;

        match (outcome, written) {
            (FeedOutcome::Cancelled, _) => Err(ArchiveError::Cancelled),
            (_, Err(e)) => Err(e),
            (FeedOutcome::WriterGone, Ok(_)) => Err(ArchiveError::WriterAborted(
                "writer closed its input early".to_string(),
            )),
            (FeedOutcome::Done(mut summary), Ok((sink, entries_written))) => {
                summary.entries_written = entries_written;
                Ok((sink, summary))
            }
        }
    }

    async fn feed(
        &self,
        job_id: Uuid,
        entries: Vec<ArchiveEntry>,
        index: String,
        tx: &mpsc::Sender<PendingEntry>,
        cancel: &CancellationToken,
        progress: &watch::Sender<ProgressUpdate>,
    ) -> FeedOutcome {
        let index = PendingEntry {
            path: INDEX_ENTRY_NAME.to_string(),
            bytes: index.into_bytes(),
        };
        if tx.send(index).await.is_err() {
            return FeedOutcome::WriterGone;
        }

        let total = entries.len();
        let timeout = self.options.fetch_timeout;
        let store = &self.store;

        // Each fetch runs as its own task so in-flight fetches keep making
        // progress while the loop below waits for channel capacity. Dropping
        // the stream aborts whatever is still running.
        let mut fetches = stream::iter(entries)
            .map(|entry| {
                let store = Arc::clone(store);
                let path = entry.document.storage_path.clone();
                async move {
                    let task = AbortOnDropHandle::new(tokio::spawn(async move {
                        match tokio::time::timeout(timeout, store.fetch(&path)).await {
                            Ok(result) => result,
                            Err(_) => Err(FetchError::Timeout(timeout.as_secs())),
                        }
                    }));
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => Err(FetchError::Backend(format!("fetch task failed: {}", e))),
                    };
                    (entry, result)
                }
            })
            .buffer_unordered(self.options.fetch_concurrency.max(1));

        let mut summary = ArchiveSummary::default();
        let mut attempted = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return FeedOutcome::Cancelled,
                next = fetches.next() => next,
            };
            let Some((entry, result)) = next else {
                break;
            };
            attempted += 1;

            let pending = match result {
                Ok(bytes) => {
                    summary.processed_documents += 1;
                    counter!("export_documents_fetched_total", "outcome" => "ok").increment(1);
                    debug!(
                        job_id = %job_id,
                        document_id = %entry.document.id,
                        bytes = bytes.len(),
                        "Document fetched"
                    );
                    PendingEntry {
                        path: entry.archive_path,
                        bytes,
                    }
                }
                Err(error) => {
                    summary.failed_documents += 1;
                    counter!(
                        "export_documents_fetched_total",
                        "outcome" => fetch_outcome_label(&error)
                    )
                    .increment(1);
                    warn!(
                        job_id = %job_id,
                        document_id = %entry.document.id,
                        error = %error,
                        "Document fetch failed, writing placeholder"
                    );
                    summary
                        .warnings
                        .push(format!("{}: {}", entry.archive_path, error));
                    PendingEntry {
                        path: entry.placeholder_path.clone(),
                        bytes: placeholder_text(&entry, &error).into_bytes(),
                    }
                }
            };

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return FeedOutcome::Cancelled,
                sent = tx.send(pending) => sent,
            };
            if sent.is_err() {
                return FeedOutcome::WriterGone;
            }

            progress.send_replace(ProgressUpdate {
                processed_documents: summary.processed_documents,
                failed_documents: summary.failed_documents,
                progress_percent: archive_percent(attempted, total),
            });
        }

        FeedOutcome::Done(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domain::models::{DocumentType, FilterSpec, NewExportJob};
    use domain::services::InMemoryFileStore;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn doc(citizen: Uuid, request: Option<Uuid>, name: &str, mime: &str) -> DocumentRef {
        DocumentRef {
            id: Uuid::new_v4(),
            citizen_id: citizen,
            request_id: request,
            document_type: DocumentType::IncomeStatement,
            storage_path: format!("store/{}", Uuid::new_v4()),
            size_bytes: 10,
            mime_type: mime.to_string(),
            original_filename: name.to_string(),
            created_at: Utc::now(),
            verified: false,
        }
    }

    fn job() -> ExportJob {
        ExportJob::from_new(
            NewExportJob {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                unit_id: None,
                filter: FilterSpec::default(),
                total_documents: 0,
                estimated_size_bytes: 0,
                warnings: vec![],
                expires_at: Utc::now() + ChronoDuration::hours(24),
            },
            Utc::now(),
        )
    }

    fn options(concurrency: usize) -> ArchiveOptions {
        ArchiveOptions {
            fetch_concurrency: concurrency,
            fetch_timeout: Duration::from_secs(5),
            write_buffer: 2,
            compression: ArchiveCompression::Deflated { level: None },
        }
    }

    /// Store with one stored file per document.
    fn store_for(docs: &[DocumentRef]) -> InMemoryFileStore {
        let store = InMemoryFileStore::new();
        for d in docs {
            store.insert(d.storage_path.clone(), format!("content of {}", d.id).into_bytes());
        }
        store
    }

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_build_entries_groups_by_citizen_and_request() {
        let citizen = Uuid::new_v4();
        let request = Uuid::new_v4();
        let entries = build_entries(&[
            doc(citizen, Some(request), "payslip.pdf", "application/pdf"),
            doc(citizen, None, "lease.pdf", "application/pdf"),
        ]);

        assert_eq!(
            entries[0].archive_path,
            format!("citizen_{}/request_{}/payslip.pdf", citizen, request)
        );
        assert_eq!(
            entries[1].archive_path,
            format!("citizen_{}/general/lease.pdf", citizen)
        );
    }

    #[test]
    fn test_build_entries_deduplicates_and_sanitizes() {
        let citizen = Uuid::new_v4();
        let entries = build_entries(&[
            doc(citizen, None, "scan.pdf", "application/pdf"),
            doc(citizen, None, "SCAN.pdf", "application/pdf"),
            doc(citizen, None, "../../etc/scan.pdf", "application/pdf"),
            doc(citizen, None, "photo", "image/png"),
        ]);
        let names: Vec<&str> = entries
            .iter()
            .map(|e| e.archive_path.rsplit_once('/').unwrap().1)
            .collect();

        assert_eq!(names, vec!["scan.pdf", "SCAN (1).pdf", "scan (2).pdf", "photo.png"]);
        assert!(entries.iter().all(|e| !e.archive_path.contains("..")));
    }

    #[test]
    fn test_placeholder_paths_never_collide_with_documents() {
        let citizen = Uuid::new_v4();
        let entries = build_entries(&[
            doc(citizen, None, "report.pdf", "application/pdf"),
            doc(citizen, None, "report.pdf.unavailable.txt", "text/plain"),
        ]);

        assert!(entries[0].archive_path.ends_with("/general/report.pdf"));
        assert!(entries[1]
            .archive_path
            .ends_with("/general/report.pdf.unavailable.txt"));
        assert!(entries[0]
            .placeholder_path
            .ends_with("/general/report.pdf (1).unavailable.txt"));

        let mut paths: Vec<String> = entries
            .iter()
            .flat_map(|e| [e.archive_path.to_lowercase(), e.placeholder_path.to_lowercase()])
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn test_archive_percent_band() {
        assert_eq!(archive_percent(0, 10), PROGRESS_SELECTED);
        assert_eq!(archive_percent(5, 10), 55);
        assert_eq!(archive_percent(10, 10), PROGRESS_ARCHIVED);
        assert_eq!(archive_percent(0, 0), PROGRESS_ARCHIVED);
    }

    #[test]
    fn test_render_index_lists_groups_and_totals() {
        let citizen = Uuid::new_v4();
        let entries = build_entries(&[
            doc(citizen, None, "a.pdf", "application/pdf"),
            doc(citizen, None, "b.pdf", "application/pdf"),
        ]);
        let job = job();
        let index = render_index(&job, &entries, Utc::now());

        assert!(index.starts_with(&format!("Document export {}", job.id)));
        assert!(index.contains("Documents: 2"));
        assert!(index.contains("Declared size: 20 bytes"));
        assert!(index.contains(&format!("citizen_{}/general/ (2 documents, 20 bytes)", citizen)));
        assert!(index.contains("  a.pdf  income_statement"));
    }

    #[tokio::test]
    async fn test_failed_fetch_becomes_placeholder() {
        let citizen = Uuid::new_v4();
        let docs: Vec<_> = (0..10)
            .map(|i| doc(citizen, None, &format!("doc-{}.pdf", i), "application/pdf"))
            .collect();
        let store = store_for(&docs);
        store.fail(
            docs[3].storage_path.clone(),
            FetchError::Backend("checksum mismatch".into()),
        );
        let generator = ArchiveGenerator::new(Arc::new(store), options(3));
        let (progress_tx, progress_rx) = watch::channel(ProgressUpdate::default());

        let (cursor, summary) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();

        assert_eq!(summary.processed_documents, 9);
        assert_eq!(summary.failed_documents, 1);
        assert_eq!(summary.entries_written, 11);
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.warnings[0].contains("checksum mismatch"));

        let last = *progress_rx.borrow();
        assert_eq!(last.progress_percent, PROGRESS_ARCHIVED);
        assert_eq!(last.processed_documents, 9);

        let names = entry_names(cursor.into_inner());
        assert_eq!(names[0], INDEX_ENTRY_NAME);
        assert_eq!(names.len(), 11);
        assert!(names
            .iter()
            .any(|n| n.ends_with("doc-3.pdf.unavailable.txt")));
    }

    #[tokio::test]
    async fn test_placeholder_explains_failure() {
        let docs = vec![doc(Uuid::new_v4(), None, "gone.pdf", "application/pdf")];
        let generator = ArchiveGenerator::new(Arc::new(InMemoryFileStore::new()), options(1));
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());

        let (cursor, summary) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();
        assert_eq!(summary.failed_documents, 1);

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let mut text = String::new();
        archive
            .by_name(&format!("citizen_{}/general/gone.pdf.unavailable.txt", docs[0].citizen_id))
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains(&docs[0].id.to_string()));
        assert!(text.contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_document_beside_placeholder_named_file() {
        let citizen = Uuid::new_v4();
        let docs = vec![
            doc(citizen, None, "report.pdf", "application/pdf"),
            doc(citizen, None, "report.pdf.unavailable.txt", "text/plain"),
        ];
        let store = InMemoryFileStore::new();
        store.insert(docs[1].storage_path.clone(), b"scanned note".to_vec());
        let generator = ArchiveGenerator::new(Arc::new(store), options(2));
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());

        let (cursor, summary) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();
        assert_eq!(summary.processed_documents, 1);
        assert_eq!(summary.failed_documents, 1);

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(archive.len(), 3);
        let mut stored = String::new();
        archive
            .by_name(&format!("citizen_{}/general/report.pdf.unavailable.txt", citizen))
            .unwrap()
            .read_to_string(&mut stored)
            .unwrap();
        assert_eq!(stored, "scanned note");

        let mut placeholder = String::new();
        archive
            .by_name(&format!(
                "citizen_{}/general/report.pdf (1).unavailable.txt",
                citizen
            ))
            .unwrap()
            .read_to_string(&mut placeholder)
            .unwrap();
        assert!(placeholder.contains(&docs[0].id.to_string()));
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out() {
        let docs = vec![
            doc(Uuid::new_v4(), None, "ok.pdf", "application/pdf"),
            doc(Uuid::new_v4(), None, "hung.pdf", "application/pdf"),
        ];
        let store = store_for(&docs);
        store.stall(docs[1].storage_path.clone());
        let generator = ArchiveGenerator::new(
            Arc::new(store),
            ArchiveOptions {
                fetch_timeout: Duration::from_millis(50),
                ..options(2)
            },
        );
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());

        let (_, summary) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();

        assert_eq!(summary.processed_documents, 1);
        assert_eq!(summary.failed_documents, 1);
        assert!(summary.warnings[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_in_flight_fetches_never_exceed_bound() {
        let citizen = Uuid::new_v4();
        let docs: Vec<_> = (0..20)
            .map(|i| doc(citizen, None, &format!("{}.pdf", i), "application/pdf"))
            .collect();
        let store = Arc::new(store_for(&docs).with_delay(Duration::from_millis(10)));
        let generator = ArchiveGenerator::new(store.clone(), options(3));
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());

        generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();

        assert_eq!(store.fetch_count(), 20);
        assert!(store.max_in_flight() <= 3, "saw {}", store.max_in_flight());
    }

    /// Sink that sleeps on every write to simulate a slow disk.
    struct SlowSink(Cursor<Vec<u8>>);

    impl Write for SlowSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            self.0.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.0.flush()
        }
    }

    impl Seek for SlowSink {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            self.0.seek(pos)
        }
    }

    #[tokio::test]
    async fn test_slow_writer_throttles_fetching() {
        let citizen = Uuid::new_v4();
        let docs: Vec<_> = (0..40)
            .map(|i| doc(citizen, None, &format!("{}.pdf", i), "application/pdf"))
            .collect();
        let store = Arc::new(store_for(&docs));
        let generator = Arc::new(ArchiveGenerator::new(
            store.clone(),
            ArchiveOptions {
                write_buffer: 1,
                ..options(2)
            },
        ));
        let entries = build_entries(&docs);
        let job = job();

        let task = {
            let generator = Arc::clone(&generator);
            tokio::spawn(async move {
                let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());
                generator
                    .generate(
                        &job,
                        entries,
                        SlowSink(Cursor::new(Vec::new())),
                        &CancellationToken::new(),
                        &progress_tx,
                    )
                    .await
                    .map(|(_, summary)| summary)
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(
            store.fetch_count() < 40,
            "fetching ran ahead of the writer: {}",
            store.fetch_count()
        );

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.processed_documents, 40);
    }

    #[tokio::test]
    async fn test_cancellation_stops_fetching() {
        let citizen = Uuid::new_v4();
        let docs: Vec<_> = (0..50)
            .map(|i| doc(citizen, None, &format!("{}.pdf", i), "application/pdf"))
            .collect();
        let store = Arc::new(store_for(&docs).with_delay(Duration::from_millis(20)));
        let generator = ArchiveGenerator::new(store.clone(), options(2));
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            trigger.cancel();
        });

        let result = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &cancel,
                &progress_tx,
            )
            .await;

        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(store.fetch_count() < 50);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_nothing() {
        let docs = vec![doc(Uuid::new_v4(), None, "a.pdf", "application/pdf")];
        let store = Arc::new(store_for(&docs));
        let generator = ArchiveGenerator::new(store.clone(), options(1));
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = generator
            .generate(&job(), build_entries(&docs), Cursor::new(Vec::new()), &cancel, &progress_tx)
            .await;
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_stored_compression_keeps_bytes() {
        let docs = vec![doc(Uuid::new_v4(), None, "a.pdf", "application/pdf")];
        let generator = ArchiveGenerator::new(
            Arc::new(store_for(&docs)),
            ArchiveOptions {
                compression: ArchiveCompression::Stored,
                ..options(1)
            },
        );
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());
        let (cursor, _) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let entry = archive.by_index(1).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }

    #[tokio::test]
    async fn test_deflate_level_zero_writes_stored_entries() {
        let docs = vec![doc(Uuid::new_v4(), None, "a.pdf", "application/pdf")];
        let generator = ArchiveGenerator::new(
            Arc::new(store_for(&docs)),
            ArchiveOptions {
                compression: ArchiveCompression::Deflated { level: Some(0) },
                ..options(1)
            },
        );
        let (progress_tx, _rx) = watch::channel(ProgressUpdate::default());
        let (cursor, summary) = generator
            .generate(
                &job(),
                build_entries(&docs),
                Cursor::new(Vec::new()),
                &CancellationToken::new(),
                &progress_tx,
            )
            .await
            .unwrap();
        assert_eq!(summary.processed_documents, 1);

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(archive.by_index(1).unwrap().compression(), CompressionMethod::Stored);
    }
}
