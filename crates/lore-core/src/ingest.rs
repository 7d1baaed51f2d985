//! Directory and archive ingestion into a knowledge base.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use lore_index::{Chunk, VectorIndex};
use lore_llm::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunker::{ChunkOverrides, Chunker};
use crate::config::{MAX_CHUNK_OVERLAP, MAX_CHUNK_SIZE};
use crate::error::{RagError, Result, cancellable};
use crate::loader::LoaderRegistry;
use crate::normalize::dedupe_ignore_case;

/// What to ingest and how to cut it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub knowledge_base: String,
    /// Directory to scan, or a `.zip` archive to unpack and scan.
    pub path: PathBuf,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IngestionRequest {
    pub fn new(knowledge_base: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            knowledge_base: knowledge_base.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunk_size: Option<usize>, chunk_overlap: Option<usize>) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    fn overrides(&self) -> ChunkOverrides {
        ChunkOverrides {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.knowledge_base.trim().is_empty() {
            return Err(RagError::validation("knowledge base id must not be blank"));
        }
        if self.path.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(RagError::validation("source path must not be blank"));
        }
        if let Some(size) = self.chunk_size
            && !(1..=MAX_CHUNK_SIZE).contains(&size)
        {
            return Err(RagError::validation(format!(
                "chunk size must be within 1..={MAX_CHUNK_SIZE}, got {size}"
            )));
        }
        if let Some(overlap) = self.chunk_overlap
            && overlap > MAX_CHUNK_OVERLAP
        {
            return Err(RagError::validation(format!(
                "chunk overlap must be within 0..={MAX_CHUNK_OVERLAP}, got {overlap}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub files_processed: usize,
    pub chunks_created: usize,
}

/// Chunks gathered from concurrently processed files, deduplicated by
/// content hash. The first chunk offered for a hash is kept.
#[derive(Default)]
struct ChunkCollector {
    inner: Mutex<CollectorInner>,
}

#[derive(Default)]
struct CollectorInner {
    seen: HashSet<String>,
    chunks: Vec<Chunk>,
}

impl ChunkCollector {
    fn offer(&self, chunk: Chunk) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.seen.insert(chunk.content_hash.clone()) {
            return false;
        }
        inner.chunks.push(chunk);
        true
    }

    /// Take the collected chunks ordered by source (ignoring case), then
    /// position, then exact source.
    fn drain_sorted(&self) -> Vec<Chunk> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut chunks = std::mem::take(&mut inner.chunks);
        inner.seen.clear();
        chunks.sort_by_cached_key(|c| (c.source.to_lowercase(), c.position, c.source.clone()));
        chunks
    }
}

/// Turns files into embedded chunks and writes them to the index.
pub struct IngestionService<E, V: ?Sized = dyn VectorIndex> {
    embedder: Arc<E>,
    index: Arc<V>,
    loaders: LoaderRegistry,
    chunker: Chunker,
    parallelism: usize,
    temp_root: Option<PathBuf>,
}

impl<E, V: ?Sized> std::fmt::Debug for IngestionService<E, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("chunker", &self.chunker)
            .field("parallelism", &self.parallelism)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl<E, V> IngestionService<E, V>
where
    E: EmbeddingProvider,
    V: VectorIndex + ?Sized,
{
    #[must_use]
    pub fn new(embedder: Arc<E>, index: Arc<V>, loaders: LoaderRegistry, chunker: Chunker) -> Self {
        let parallelism = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            embedder,
            index,
            loaders,
            chunker,
            parallelism,
            temp_root: None,
        }
    }

    /// Cap the number of files processed at the same time.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Unpack archives under `dir` instead of the system temporary directory.
    #[must_use]
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// Ingest every supported file under `request.path` into
    /// `request.knowledge_base`.
    ///
    /// Either every produced chunk is written or the call fails; archives are
    /// unpacked into a temporary directory removed before returning.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed requests, `NotFound` when the source
    /// does not exist, `Cancelled` when `cancel` fires, and backend or I/O
    /// errors as they occur.
    pub async fn ingest(
        &self,
        request: IngestionRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let started = Instant::now();
        let knowledge_base = request.knowledge_base.trim().to_owned();
        let tags = dedupe_ignore_case(&request.tags);

        let (root, _extracted) = self.resolve_source(&request.path, cancel).await?;

        let files = discover(&root, &self.loaders, cancel).await?;
        if files.is_empty() {
            tracing::info!(%knowledge_base, root = %root.display(), "no supported files found");
            return Ok(IngestionResult::default());
        }
        tracing::info!(%knowledge_base, files = files.len(), "ingestion started");

        let files_processed = files.len();
        let collector = Arc::new(ChunkCollector::default());
        self.chunk_files(
            &root,
            files,
            &knowledge_base,
            &tags,
            request.overrides(),
            &collector,
            cancel,
        )
        .await?;

        let mut chunks = collector.drain_sorted();
        if chunks.is_empty() {
            return Ok(IngestionResult {
                files_processed,
                chunks_created: 0,
            });
        }

        self.embed_and_store(&mut chunks, cancel).await?;

        let result = IngestionResult {
            files_processed,
            chunks_created: chunks.len(),
        };
        tracing::info!(
            %knowledge_base,
            files = result.files_processed,
            chunks = result.chunks_created,
            elapsed_ms = started.elapsed().as_millis(),
            "ingestion completed"
        );
        Ok(result)
    }

    /// Effective directory to scan plus the guard owning an unpacked archive.
    async fn resolve_source(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        if is_zip(path) && path.is_file() {
            let archive = path.to_path_buf();
            let temp_root = self.temp_root.clone();
            let dir = cancellable(cancel, async {
                tokio::task::spawn_blocking(move || {
                    extract_archive(&archive, temp_root.as_deref())
                })
                .await
                .map_err(|e| RagError::Internal(format!("archive task failed: {e}")))?
            })
            .await?;
            return Ok((dir.path().to_path_buf(), Some(dir)));
        }

        if !path.is_dir() {
            return Err(RagError::NotFound(format!(
                "source {} does not exist or is not a directory",
                path.display()
            )));
        }
        Ok((path.to_path_buf(), None))
    }

    #[allow(clippy::too_many_arguments)]
    async fn chunk_files(
        &self,
        root: &Path,
        files: Vec<PathBuf>,
        knowledge_base: &str,
        tags: &[String],
        overrides: ChunkOverrides,
        collector: &Arc<ChunkCollector>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for path in files {
            let semaphore = Arc::clone(&semaphore);
            let collector = Arc::clone(collector);
            let loaders = self.loaders.clone();
            let chunker = self.chunker;
            let cancel = cancel.clone();
            let knowledge_base = knowledge_base.to_owned();
            let tags = tags.to_vec();
            let source = relative_source(root, &path);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| RagError::Internal(e.to_string()))?;
                let text = cancellable(&cancel, loaders.load(&path)).await?;

                let mut produced = 0usize;
                let mut kept = 0usize;
                for chunk in chunker.chunk(&knowledge_base, &source, &text, &tags, overrides) {
                    produced += 1;
                    if collector.offer(chunk) {
                        kept += 1;
                    }
                }
                tracing::debug!(%source, produced, kept, "file chunked");
                Ok::<(), RagError>(())
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(RagError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => return Ok(()),
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Err(e)) => {
                    tasks.abort_all();
                    return Err(RagError::Internal(format!("file task failed: {e}")));
                }
            }
        }
    }

    async fn embed_and_store(
        &self,
        chunks: &mut [Chunk],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = cancellable(cancel, self.embedder.embed_batch(&texts)).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Internal(format!(
                "embedding backend returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimension = match self.embedder.dimension() {
            0 => vectors.first().map_or(0, Vec::len),
            declared => declared,
        };
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.vector = Some(vector);
        }

        if dimension > 0 {
            cancellable(cancel, self.index.ensure_collection(dimension as u64)).await?;
        }
        cancellable(cancel, self.index.upsert(chunks.to_vec())).await?;
        Ok(())
    }
}

const EXTRACT_PREFIX: &str = "lore-ingest-";

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn extract_archive(archive: &Path, temp_root: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(EXTRACT_PREFIX);
    let dir = match temp_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| RagError::Archive(e.to_string()))?;
    zip.extract(dir.path())
        .map_err(|e| RagError::Archive(e.to_string()))?;
    Ok(dir)
}

/// Supported files under `root`, recursively, sorted by path. Ignore files
/// and hidden-file rules are not applied.
async fn discover(
    root: &Path,
    loaders: &LoaderRegistry,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let loaders = loaders.clone();
    cancellable(cancel, async move {
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in ignore::WalkBuilder::new(&root).standard_filters(false).build() {
                let entry = entry.map_err(|e| RagError::Io(std::io::Error::other(e)))?;
                if entry.file_type().is_some_and(|t| t.is_file())
                    && loaders.supports_path(entry.path())
                {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok::<_, RagError>(files)
        })
        .await
        .map_err(|e| RagError::Internal(format!("file discovery failed: {e}")))?
    })
    .await
}

fn relative_source(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
