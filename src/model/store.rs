use std::{
    fs, io,
    path::PathBuf,
    time::SystemTime,
};

use crate::model::VersionId;

/// File-level facts about one stored artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStat {
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

/// Read-only view over wherever artifacts are persisted.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Every version with a complete artifact, in no particular order.
    fn versions(&self) -> io::Result<Vec<VersionId>>;

    fn contains(&self, version: &VersionId) -> bool;

    fn stat(&self, version: &VersionId) -> Option<ArtifactStat>;

    /// Raw artifact bytes. Fails with [`io::ErrorKind::NotFound`] when the
    /// version has no artifact.
    fn read(&self, version: &VersionId) -> io::Result<Vec<u8>>;

    /// Name of the artifact file, used to pick a decoder.
    fn artifact_name(&self) -> &str;
}

/// Directory tree laid out as `<root>/<version>/<artifact_file>`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    artifact_file: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, artifact_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            artifact_file: artifact_file.into(),
        }
    }

    /// Path of the artifact for `version`, or `None` when the id cannot
    /// address a directory directly under the root.
    pub fn artifact_path(&self, version: &VersionId) -> Option<PathBuf> {
        let id = version.as_str();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return None;
        }
        Some(self.root.join(id).join(&self.artifact_file))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn versions(&self) -> io::Result<Vec<VersionId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let version = VersionId::from(name);
            if self.contains(&version) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    fn contains(&self, version: &VersionId) -> bool {
        self.artifact_path(version)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn stat(&self, version: &VersionId) -> Option<ArtifactStat> {
        let path = self.artifact_path(version)?;
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(ArtifactStat {
            size_bytes: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn read(&self, version: &VersionId) -> io::Result<Vec<u8>> {
        let path = self.artifact_path(version).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("version id '{version}' does not address an artifact"),
            )
        })?;
        fs::read(path)
    }

    fn artifact_name(&self) -> &str {
        &self.artifact_file
    }
}
