use std::path::Path;

use super::{DEFAULT_MAX_FILE_SIZE, LoadFuture, LoaderError, TextLoader};

/// Extracts the text layer of PDF documents on a blocking thread.
pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TextLoader for PdfLoader {
    fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case("pdf")
    }

    fn load(&self, path: &Path) -> LoadFuture<'_> {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(LoaderError::FileTooLarge(meta.len()));
            }

            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text(&path).map_err(|e| LoaderError::Pdf(e.to_string()))
            })
            .await
            .map_err(|e| LoaderError::Io(std::io::Error::other(e)))?
        })
    }
}
