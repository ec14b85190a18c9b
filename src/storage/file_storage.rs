use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::configuration::types::UploadConfig;
use crate::error_handling::types::ArtifactError;
use crate::storage::types::{DocumentUpload, LiveImageUpload};

/// Which upload area a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    IdDocument,
    LiveImage,
}

impl ArtifactKind {
    fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::IdDocument => "id_documents",
            ArtifactKind::LiveImage => "live_images",
        }
    }
}

/// A file written by [`ArtifactStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    /// Name the caller uploaded the file under
    pub file_name: String,
    /// Lowercase extension without the dot
    pub file_type: String,
    pub file_size: u64,
}

impl StoredArtifact {
    pub fn document_upload(&self) -> DocumentUpload {
        DocumentUpload {
            file_path: self.path.to_string_lossy().into_owned(),
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            file_size: self.file_size,
        }
    }

    pub fn live_image_upload(&self) -> LiveImageUpload {
        LiveImageUpload { file_path: self.path.to_string_lossy().into_owned() }
    }
}

/// Filesystem storage for uploaded ID documents and live captures.
///
/// Layout under the upload root:
/// - `id_documents/<uuid>_<name>`
/// - `live_images/<uuid>_<name>`
pub struct ArtifactStore {
    root: PathBuf,
    config: UploadConfig,
}

impl ArtifactStore {
    pub fn new(config: &UploadConfig) -> Result<Self, ArtifactError> {
        for kind in [ArtifactKind::IdDocument, ArtifactKind::LiveImage] {
            let dir = config.upload_dir.join(kind.dir_name());
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create upload dir {}: {}", dir.display(), e);
                ArtifactError::IoError(e)
            })?;
        }
        let root = config.upload_dir.canonicalize()?;
        info!("ArtifactStore initialized at {}", root.display());
        Ok(Self { root, config: config.clone() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    fn limit_for(&self, kind: ArtifactKind) -> u64 {
        match kind {
            ArtifactKind::IdDocument => self.config.max_id_file_size,
            ArtifactKind::LiveImage => self.config.max_live_image_size,
        }
    }

    fn allowed_for(&self, kind: ArtifactKind) -> &[String] {
        match kind {
            ArtifactKind::IdDocument => &self.config.allowed_id_extensions,
            ArtifactKind::LiveImage => &self.config.allowed_live_extensions,
        }
    }

    /// Checks size and extension; returns the lowercase extension without the dot.
    pub fn validate(
        &self,
        kind: ArtifactKind,
        file_name: &str,
        size: u64,
    ) -> Result<String, ArtifactError> {
        let limit = self.limit_for(kind);
        if size > limit {
            return Err(ArtifactError::TooLarge { size, limit });
        }
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| ArtifactError::ExtensionNotAllowed(file_name.to_string()))?;
        let dotted = format!(".{}", ext);
        if !self
            .allowed_for(kind)
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&dotted))
        {
            return Err(ArtifactError::ExtensionNotAllowed(file_name.to_string()));
        }
        Ok(ext)
    }

    /// Validates and writes `data`, returning where it landed.
    pub fn save(
        &self,
        kind: ArtifactKind,
        file_name: &str,
        data: &[u8],
    ) -> Result<StoredArtifact, ArtifactError> {
        let size = data.len() as u64;
        let file_type = self.validate(kind, file_name, size)?;
        let base = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let safe: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        let path = self.dir_for(kind).join(format!("{}_{}", Uuid::new_v4(), safe));

        let mut f = File::create(&path).map_err(|e| {
            error!("Failed to create artifact {}: {}", path.display(), e);
            ArtifactError::IoError(e)
        })?;
        f.write_all(data).map_err(|e| {
            error!("Failed to write artifact {}: {}", path.display(), e);
            ArtifactError::IoError(e)
        })?;
        debug!("Stored {} byte(s) at {}", size, path.display());
        Ok(StoredArtifact { path, file_name: file_name.to_string(), file_type, file_size: size })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, ArtifactError> {
        let resolved = path.canonicalize().map_err(|e| {
            warn!("Cannot resolve artifact path {}: {}", path.display(), e);
            ArtifactError::IoError(e)
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(ArtifactError::OutsideUploadRoot(path.display().to_string()));
        }
        Ok(resolved)
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Vec<u8>, ArtifactError> {
        let resolved = self.resolve(path.as_ref())?;
        let mut buf = Vec::new();
        File::open(&resolved)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| {
                error!("Read failed {}: {}", resolved.display(), e);
                ArtifactError::IoError(e)
            })?;
        debug!("Read {} byte(s) from {}", buf.len(), resolved.display());
        Ok(buf)
    }

    pub fn remove<P: AsRef<Path>>(&self, path: P) -> Result<(), ArtifactError> {
        let resolved = self.resolve(path.as_ref())?;
        fs::remove_file(&resolved)?;
        debug!("Removed artifact {}", resolved.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(&UploadConfig {
            upload_dir: dir.path().join("uploads"),
            ..UploadConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let saved = store.save(ArtifactKind::IdDocument, "passport.PNG", b"png-bytes").unwrap();
        assert_eq!(saved.file_type, "png");
        assert_eq!(saved.file_size, 9);
        assert!(saved.path.starts_with(store.root().join("id_documents")));
        assert!(saved.path.file_name().unwrap().to_str().unwrap().ends_with("_passport.PNG"));
        assert_eq!(store.load(&saved.path).unwrap(), b"png-bytes");

        let upload = saved.document_upload();
        assert_eq!(upload.file_name, "passport.PNG");
        assert_eq!(upload.file_size, 9);
    }

    #[test]
    fn test_same_name_gets_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.save(ArtifactKind::LiveImage, "selfie.jpg", b"a").unwrap();
        let b = store.save(ArtifactKind::LiveImage, "selfie.jpg", b"b").unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(store.load(&b.path).unwrap(), b"b");
    }

    #[test]
    fn test_limits_enforced() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let big = vec![0u8; 5 * 1024 * 1024 + 1];
        assert!(matches!(
            store.save(ArtifactKind::LiveImage, "selfie.jpg", &big),
            Err(ArtifactError::TooLarge { limit, .. }) if limit == 5 * 1024 * 1024
        ));
        // same bytes are fine as an ID document
        assert!(store.save(ArtifactKind::IdDocument, "scan.pdf", &big).is_ok());

        assert!(matches!(
            store.save(ArtifactKind::LiveImage, "selfie.pdf", b"x"),
            Err(ArtifactError::ExtensionNotAllowed(_))
        ));
        assert!(matches!(
            store.save(ArtifactKind::IdDocument, "noext", b"x"),
            Err(ArtifactError::ExtensionNotAllowed(_))
        ));
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let outside = dir.path().join("secret.png");
        fs::write(&outside, b"nope").unwrap();
        assert!(matches!(store.load(&outside), Err(ArtifactError::OutsideUploadRoot(_))));

        let sneaky = store.root().join("id_documents").join("..").join("..").join("secret.png");
        assert!(matches!(store.load(&sneaky), Err(ArtifactError::OutsideUploadRoot(_))));

        let saved = store.save(ArtifactKind::IdDocument, "../../evil.png", b"x").unwrap();
        assert!(saved.path.starts_with(store.root()));
    }
}
