use std::path::Path;

use super::{DEFAULT_MAX_FILE_SIZE, LoadFuture, LoaderError, TextLoader};

const EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// UTF-8 text and markdown files. Invalid byte sequences are replaced rather
/// than rejected.
pub struct PlainTextLoader {
    pub max_file_size: u64,
}

impl Default for PlainTextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TextLoader for PlainTextLoader {
    fn supports(&self, extension: &str) -> bool {
        EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(extension))
    }

    fn load(&self, path: &Path) -> LoadFuture<'_> {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(LoaderError::FileTooLarge(meta.len()));
            }

            let bytes = tokio::fs::read(&path).await?;
            let text = String::from_utf8_lossy(&bytes);
            Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_owned())
        })
    }
}
