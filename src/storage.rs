//! File store backing the request methods.
//!
//! Request paths are resolved against a root directory. Only plain
//! components are allowed; `..` and anything else that could leave the
//! root is refused with [`ResourceError::Forbidden`].

use crate::error::ResourceError;
use bytes::Bytes;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Read, write and delete resources addressed by request path.
///
/// Implementations are blocking; callers run them off the async workers.
pub trait FileStore: Send + Sync + 'static {
    /// Read the whole resource.
    fn read(&self, path: &str) -> Result<Bytes, ResourceError>;

    /// Create the resource, or truncate it, and write `contents`.
    fn write(&self, path: &str, contents: &[u8]) -> Result<(), ResourceError>;

    /// Remove the resource.
    fn remove(&self, path: &str) -> Result<(), ResourceError>;
}

/// A [`FileStore`] over a directory on local disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!(root = %root.display(), "Initializing file store");
        Self { root }
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path onto the root directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, ResourceError> {
        let relative = path.trim_start_matches('/');
        let mut resolved = self.root.clone();

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    debug!(path, "Refusing path outside the store root");
                    return Err(ResourceError::Forbidden);
                }
            }
        }
        Ok(resolved)
    }
}

impl FileStore for DiskStore {
    fn read(&self, path: &str) -> Result<Bytes, ResourceError> {
        let resolved = self.resolve(path)?;
        Ok(Bytes::from(fs::read(resolved)?))
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), ResourceError> {
        let resolved = self.resolve(path)?;
        fs::write(resolved, contents)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), ResourceError> {
        let resolved = self.resolve(path)?;
        fs::remove_file(resolved)?;
        Ok(())
    }
}
