//! Extension-selected readers that turn files into plain text.

#[cfg(feature = "pdf")]
mod pdf;
mod plain;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "pdf")]
pub use pdf::PdfLoader;
pub use plain::PlainTextLoader;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LoaderError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no loader for {0}")]
    Unsupported(String),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[cfg(feature = "pdf")]
    #[error("PDF error: {0}")]
    Pdf(String),
}

/// Reader for one family of file formats.
pub trait TextLoader: Send + Sync {
    /// Whether files with this extension (without the dot, any case) are
    /// handled.
    fn supports(&self, extension: &str) -> bool;

    fn load(&self, path: &Path) -> LoadFuture<'_>;
}

/// Ordered set of loaders; the first one supporting an extension wins.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: Vec<Arc<dyn TextLoader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

impl LoaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain text and markdown, plus PDF when built with the `pdf` feature.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new().with_loader(PlainTextLoader::default());
        #[cfg(feature = "pdf")]
        let registry = registry.with_loader(PdfLoader::default());
        registry
    }

    #[must_use]
    pub fn with_loader(mut self, loader: impl TextLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    #[must_use]
    pub fn find(&self, path: &Path) -> Option<&dyn TextLoader> {
        let ext = path.extension()?.to_str()?;
        self.loaders
            .iter()
            .find(|l| l.supports(ext))
            .map(AsRef::as_ref)
    }

    #[must_use]
    pub fn supports_path(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Read `path` with the first matching loader.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` when no loader claims the extension, or the
    /// loader's own error.
    pub async fn load(&self, path: &Path) -> Result<String, LoaderError> {
        let loader = self
            .find(path)
            .ok_or_else(|| LoaderError::Unsupported(path.display().to_string()))?;
        loader.load(path).await
    }
}
