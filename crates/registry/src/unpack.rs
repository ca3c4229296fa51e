//! Bundle extraction

use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use tempfile::Builder;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::{RegistryError, RegistryResult};

/// Extracts a fetched bundle into a model directory
#[cfg_attr(test, mockall::automock)]
pub trait Unpacker: Send + Sync {
    fn unpack(&self, bundle: &[u8], target: &Path) -> RegistryResult<()>;
}

/// Zip bundles. Entries whose names escape the target are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipUnpacker;

impl Unpacker for ZipUnpacker {
    fn unpack(&self, bundle: &[u8], target: &Path) -> RegistryResult<()> {
        let mut archive = ZipArchive::new(Cursor::new(bundle)).map_err(unpack_error)?;
        let parent = target
            .parent()
            .ok_or_else(|| RegistryError::Unpack(format!("{} has no parent directory", target.display())))?;
        fs::create_dir_all(parent).map_err(unpack_error)?;

        // extract beside the target so a failure never touches what is already there
        let staging = Builder::new().prefix(".unpack-").tempdir_in(parent).map_err(unpack_error)?;
        extract(&mut archive, staging.path())?;
        replace_dir(staging.path(), target)?;

        debug!("Unpacked {} entries into {}", archive.len(), target.display());
        Ok(())
    }
}

fn extract(archive: &mut ZipArchive<Cursor<&[u8]>>, root: &Path) -> RegistryResult<()> {
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(unpack_error)?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!("Bundle entry {:?} escapes the model directory", entry.name());
                return Err(RegistryError::Unpack(format!("unsafe entry name {:?}", entry.name())));
            }
        };
        let path = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&path).map_err(unpack_error)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(unpack_error)?;
        }
        let mut file = fs::File::create(&path).map_err(unpack_error)?;
        io::copy(&mut entry, &mut file).map_err(unpack_error)?;
    }
    Ok(())
}

/// Move `staged` to `target`, retiring whatever `target` held only once the move succeeds
fn replace_dir(staged: &Path, target: &Path) -> RegistryResult<()> {
    if !target.exists() {
        return fs::rename(staged, target).map_err(unpack_error);
    }

    let parent = target.parent().unwrap_or(target);
    let retired = Builder::new().prefix(".retired-").tempdir_in(parent).map_err(unpack_error)?;
    let previous = retired.path().join("previous");
    fs::rename(target, &previous).map_err(unpack_error)?;
    if let Err(err) = fs::rename(staged, target) {
        if let Err(restore) = fs::rename(&previous, target) {
            warn!("could not restore {}: {}", target.display(), restore);
        }
        return Err(unpack_error(err));
    }
    Ok(())
}

fn unpack_error<E: std::fmt::Display>(err: E) -> RegistryError {
    RegistryError::Unpack(err.to_string())
}
