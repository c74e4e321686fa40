//! Attachment ingestion.
//!
//! Files from any source (file picker, clipboard paste) and remote links
//! are normalized into [`Attachment`]s with a self-describing locator. The
//! pipeline keeps the ordered pending list plus a parallel list of the raw
//! files until a message is sent or the list is cleared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use tokio::sync::watch;
use uuid::Uuid;

use converse_core::types::{Attachment, AttachmentCategory, Locator};

use crate::error::ChatError;

const DEFAULT_MIME: &str = "application/octet-stream";
const LINK_MIME: &str = "text/uri-list";

/// Where a file came from. Informational only; every source is handled alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSource {
    #[default]
    Picker,
    Paste,
}

/// A raw file handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLike {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub source: FileSource,
}

impl FileLike {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
            source: FileSource::Picker,
        }
    }

    pub fn with_source(mut self, source: FileSource) -> Self {
        self.source = source;
        self
    }
}

#[derive(Default)]
struct PipelineState {
    pending: Vec<Attachment>,
    raw_files: Vec<FileLike>,
}

/// Ordered pending attachments with their raw files.
pub struct AttachmentPipeline {
    state: Mutex<PipelineState>,
    snapshot: watch::Sender<Arc<Vec<Attachment>>>,
    input_generation: AtomicU64,
}

impl Default for AttachmentPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentPipeline {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            state: Mutex::new(PipelineState::default()),
            snapshot,
            input_generation: AtomicU64::new(0),
        }
    }

    /// Map a MIME type to its display category.
    pub fn classify(mime_type: &str) -> AttachmentCategory {
        AttachmentCategory::from_mime(mime_type)
    }

    /// Ingest a file.
    ///
    /// The payload is encoded off the async runtime. The attachment becomes
    /// visible in the pending list only once encoding is done, in a single
    /// append together with its raw file. No size limit is applied.
    pub async fn ingest(&self, file: FileLike) -> Result<Attachment, ChatError> {
        let mime_type = if file.mime_type.trim().is_empty() {
            DEFAULT_MIME.to_string()
        } else {
            file.mime_type.clone()
        };

        let bytes = file.bytes.clone();
        let encoded = tokio::task::spawn_blocking(move || BASE64_STANDARD.encode(bytes))
            .await
            .map_err(|e| ChatError::Attachment(format!("failed to encode {}: {}", file.name, e)))?;

        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            name: file.name.clone(),
            category: Self::classify(&mime_type),
            size: file.bytes.len() as u64,
            is_link: false,
            locator: Locator::inline(&mime_type, &encoded),
            mime_type,
        };

        tracing::debug!(
            attachment_id = %attachment.id,
            name = %attachment.name,
            category = %attachment.category,
            size = attachment.size,
            source = ?file.source,
            "Attachment ingested"
        );

        {
            let mut state = self.state.lock().expect("attachment mutex poisoned");
            state.pending.push(attachment.clone());
            state.raw_files.push(file);
            self.publish(&state);
        }
        Ok(attachment)
    }

    /// Add a remote link. Links have no raw file and a size of 0.
    pub fn ingest_link(&self, url: &str) -> Result<Attachment, ChatError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ChatError::Attachment("link URL is empty".to_string()));
        }
        let name = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
            .unwrap_or(url)
            .to_string();

        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            name,
            mime_type: LINK_MIME.to_string(),
            category: AttachmentCategory::Link,
            size: 0,
            is_link: true,
            locator: Locator::Remote {
                url: url.to_string(),
            },
        };
        tracing::debug!(attachment_id = %attachment.id, url = %url, "Link attached");

        let mut state = self.state.lock().expect("attachment mutex poisoned");
        state.pending.push(attachment.clone());
        self.publish(&state);
        Ok(attachment)
    }

    /// Remove one pending attachment by id, or everything with `None`.
    ///
    /// The raw-file list is filtered by name: the first raw file whose name
    /// matches the removed attachment goes with it. With two same-named files
    /// this may pair the wrong raw file with the removed attachment.
    pub fn remove(&self, attachment_id: Option<&str>) -> Option<Attachment> {
        let mut state = self.state.lock().expect("attachment mutex poisoned");
        let removed = match attachment_id {
            Some(id) => {
                let index = state.pending.iter().position(|a| a.id == id)?;
                let removed = state.pending.remove(index);
                if !removed.is_link {
                    if let Some(raw_index) =
                        state.raw_files.iter().position(|f| f.name == removed.name)
                    {
                        state.raw_files.remove(raw_index);
                    }
                }
                Some(removed)
            }
            None => {
                state.pending.clear();
                state.raw_files.clear();
                None
            }
        };
        self.input_generation.fetch_add(1, Ordering::SeqCst);
        self.publish(&state);
        removed
    }

    /// Freeze and clear the pending list for a send.
    pub fn take_pending(&self) -> Vec<Attachment> {
        let mut state = self.state.lock().expect("attachment mutex poisoned");
        let pending = std::mem::take(&mut state.pending);
        state.raw_files.clear();
        self.input_generation.fetch_add(1, Ordering::SeqCst);
        self.publish(&state);
        pending
    }

    pub fn pending(&self) -> Vec<Attachment> {
        self.state
            .lock()
            .expect("attachment mutex poisoned")
            .pending
            .clone()
    }

    pub fn raw_files(&self) -> Vec<FileLike> {
        self.state
            .lock()
            .expect("attachment mutex poisoned")
            .raw_files
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .expect("attachment mutex poisoned")
            .pending
            .is_empty()
    }

    /// Bumped whenever the file input must be reset, so selecting the same
    /// file again is treated as a fresh ingestion.
    pub fn input_generation(&self) -> u64 {
        self.input_generation.load(Ordering::SeqCst)
    }

    /// Receive a new pending-list snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Attachment>>> {
        self.snapshot.subscribe()
    }

    fn publish(&self, state: &PipelineState) {
        self.snapshot.send_replace(Arc::new(state.pending.clone()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime: &str, bytes: &[u8]) -> FileLike {
        FileLike::new(name, mime, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_ingest_builds_inline_locator() {
        let pipeline = AttachmentPipeline::new();
        let attachment = pipeline
            .ingest(file("cat.png", "image/png", b"png-bytes"))
            .await
            .unwrap();

        assert_eq!(attachment.category, AttachmentCategory::Image);
        assert_eq!(attachment.size, 9);
        assert!(!attachment.is_link);
        let (mime, payload) = attachment.locator.inline_parts().unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(BASE64_STANDARD.decode(payload).unwrap(), b"png-bytes");

        assert_eq!(pipeline.pending(), vec![attachment]);
        assert_eq!(pipeline.raw_files().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_empty_mime_defaults_to_octet_stream() {
        let pipeline = AttachmentPipeline::new();
        let attachment = pipeline.ingest(file("blob", "", b"x")).await.unwrap();
        assert_eq!(attachment.mime_type, DEFAULT_MIME);
        assert_eq!(attachment.category, AttachmentCategory::File);
    }

    #[tokio::test]
    async fn test_pasted_file_is_ingested_like_picked_one() {
        let pipeline = AttachmentPipeline::new();
        let pasted = file("pasted.txt", "text/plain", b"notes").with_source(FileSource::Paste);
        let attachment = pipeline.ingest(pasted).await.unwrap();
        assert_eq!(attachment.category, AttachmentCategory::File);
        assert_eq!(pipeline.raw_files()[0].source, FileSource::Paste);
    }

    #[tokio::test]
    async fn test_snapshot_sees_only_complete_entries() {
        let pipeline = AttachmentPipeline::new();
        let mut rx = pipeline.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        pipeline
            .ingest(file("a.pdf", "application/pdf", b"%PDF"))
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].locator.inline_parts().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_ingests_are_independent() {
        let pipeline = Arc::new(AttachmentPipeline::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline
                    .ingest(file(&format!("f{}.txt", i), "text/plain", b"hi"))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(pipeline.pending().len(), 8);
        assert_eq!(pipeline.raw_files().len(), 8);
    }

    #[test]
    fn test_ingest_link() {
        let pipeline = AttachmentPipeline::new();
        let attachment = pipeline
            .ingest_link(" https://example.com/docs/report.pdf ")
            .unwrap();
        assert!(attachment.is_link);
        assert_eq!(attachment.size, 0);
        assert_eq!(attachment.category, AttachmentCategory::Link);
        assert_eq!(attachment.name, "report.pdf");
        assert_eq!(
            attachment.locator,
            Locator::Remote {
                url: "https://example.com/docs/report.pdf".to_string()
            }
        );
        assert!(pipeline.raw_files().is_empty());

        let bare = pipeline.ingest_link("https://example.com").unwrap();
        assert_eq!(bare.name, "example.com");

        assert!(pipeline.ingest_link("   ").is_err());
    }

    #[tokio::test]
    async fn test_remove_same_named_removes_one() {
        let pipeline = AttachmentPipeline::new();
        let first = pipeline
            .ingest(file("notes.txt", "text/plain", b"one"))
            .await
            .unwrap();
        let second = pipeline
            .ingest(file("notes.txt", "text/plain", b"two"))
            .await
            .unwrap();
        let other = pipeline
            .ingest(file("image.jpg", "image/jpeg", b"jpg"))
            .await
            .unwrap();

        let removed = pipeline.remove(Some(second.id.as_str())).unwrap();
        assert_eq!(removed.id, second.id);
        assert_eq!(pipeline.pending(), vec![first, other]);

        let raw = pipeline.raw_files();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.iter().filter(|f| f.name == "notes.txt").count(), 1);
        assert_eq!(raw.iter().filter(|f| f.name == "image.jpg").count(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_noop() {
        let pipeline = AttachmentPipeline::new();
        pipeline.ingest(file("a.txt", "text/plain", b"a")).await.unwrap();
        assert!(pipeline.remove(Some("missing")).is_none());
        assert_eq!(pipeline.pending().len(), 1);
        assert_eq!(pipeline.raw_files().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_all_clears_both_lists_and_resets_input() {
        let pipeline = AttachmentPipeline::new();
        pipeline.ingest(file("a.txt", "text/plain", b"a")).await.unwrap();
        pipeline.ingest_link("https://example.com/x").unwrap();
        let generation = pipeline.input_generation();

        assert!(pipeline.remove(None).is_none());
        assert!(pipeline.is_empty());
        assert!(pipeline.raw_files().is_empty());
        assert_eq!(pipeline.input_generation(), generation + 1);

        // Same file again is a fresh ingestion.
        let again = pipeline.ingest(file("a.txt", "text/plain", b"a")).await.unwrap();
        assert_eq!(pipeline.pending(), vec![again]);
    }

    #[tokio::test]
    async fn test_take_pending_freezes_and_clears() {
        let pipeline = AttachmentPipeline::new();
        let a = pipeline.ingest(file("a.txt", "text/plain", b"a")).await.unwrap();
        let taken = pipeline.take_pending();
        assert_eq!(taken, vec![a]);
        assert!(pipeline.is_empty());
        assert!(pipeline.raw_files().is_empty());
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            AttachmentPipeline::classify("application/msword"),
            AttachmentCategory::Docx
        );
        assert_eq!(
            AttachmentPipeline::classify("image/webp"),
            AttachmentCategory::Image
        );
        assert_eq!(
            AttachmentPipeline::classify("text/csv"),
            AttachmentCategory::File
        );
    }
}
