use crate::cache::error::CacheError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CACHE_DIR_NAME: &str = "antarctic_meteo_cache";

pub fn get_cache_dir() -> Result<PathBuf, CacheError> {
    dirs::cache_dir()
        .ok_or(CacheError::DirResolution)
        .map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(CacheError::DirCreation(
                    path.to_path_buf(),
                    Arc::new(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "cache path exists but is not a directory",
                    )),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| CacheError::DirCreation(path.to_path_buf(), Arc::new(e)))
        }
        Err(e) => Err(CacheError::DirCreation(path.to_path_buf(), Arc::new(e))),
    }
}
