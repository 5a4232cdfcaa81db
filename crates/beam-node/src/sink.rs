use std::path::{Path, PathBuf};

use beam_gateway::MaterializeSink;
use beam_transfer::{CompletedDownload, TransferError};
use tracing::info;

/// Writes finished downloads into a directory under their announced name.
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Remote names are untrusted: keep only the final component.
    fn target_path(&self, name: &str) -> PathBuf {
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| !n.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("download.bin"));
        self.dir.join(file_name)
    }
}

impl MaterializeSink for DirectorySink {
    async fn materialize(&mut self, download: CompletedDownload) -> Result<(), TransferError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.target_path(&download.metadata.name);
        tokio::fs::write(&path, &download.bytes).await?;

        info!(path = %path.display(), bytes = download.bytes.len(), "file saved");
        self.written.push(path);
        Ok(())
    }
}
