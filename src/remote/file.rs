use super::{FetchOutcome, RemoteError, RemoteStore, decode_payload, encode_payload};
use crate::models::Snapshot;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::io::ErrorKind;

/// Snapshot kept as a JSON document on local disk.
///
/// Missing and empty files read as [`FetchOutcome::Empty`]. Writes go to a
/// sibling temp file first and are renamed into place.
pub struct FileRemoteStore {
    path: Utf8PathBuf,
}

impl FileRemoteStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn temp_path(&self) -> Utf8PathBuf {
        let mut name = self.path.file_name().unwrap_or("state.json").to_string();
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RemoteStore for FileRemoteStore {
    async fn fetch(&self) -> Result<FetchOutcome, RemoteError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => decode_payload(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("snapshot file {} not found, treating as empty", self.path);
                Ok(FetchOutcome::Empty)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), RemoteError> {
        let payload = encode_payload(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, payload).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path)
    }
}
