use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use fault_injection::{annotate, maybe};

use crate::*;

/// File extensions, compared case-insensitively, that directory ingestion
/// hands to the engine.
pub const SUPPORTED_IMG_EXTS: &[&str] = &[
    "jpeg", "jpg", "gif", "png", "rgb", "jpe", "pbm", "pgm", "ppm", "tiff",
    "tif", "rast", "xbm", "bmp",
];

/// Returns `true` if `path` has one of the `SUPPORTED_IMG_EXTS`.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| SUPPORTED_IMG_EXTS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Parses an image id out of a file name like `1234.jpg`.
pub fn image_id_from_file_name(path: &Path) -> Option<ImageId> {
    path.file_stem()?.to_str()?.parse().ok()
}

struct Walk<'a> {
    recurse: bool,
    filename_as_id: bool,
    stop: &'a AtomicBool,
}

impl<E: Engine> ImgDb<E> {
    /// Add every supported image file in `path` to a space, returning
    /// how many the engine accepted.
    ///
    /// Files are visited in whatever order the file system lists them.
    /// With `filename_as_id`, a file named `42.png` is stored as image 42
    /// and files whose names are not numbers are skipped; otherwise ids
    /// come from the space's cursor. Files the engine refuses are logged
    /// and skipped. Symbolic links to directories are not followed.
    pub fn ingest_directory<P: AsRef<Path>>(
        &self,
        id: SpaceId,
        path: P,
        recurse: bool,
        filename_as_id: bool,
    ) -> Result<usize> {
        let stop = AtomicBool::new(false);
        self.ingest_directory_until(id, path, recurse, filename_as_id, &stop)
    }

    /// Like `ingest_directory`, but checks `stop` between files and
    /// returns the additions made so far once it is set.
    pub fn ingest_directory_until<P: AsRef<Path>>(
        &self,
        id: SpaceId,
        path: P,
        recurse: bool,
        filename_as_id: bool,
        stop: &AtomicBool,
    ) -> Result<usize> {
        let path = path.as_ref();
        log::debug!(
            "ingest_directory(space: {}, path: {:?}, recurse: {}, filename_as_id: {})",
            id,
            path,
            recurse,
            filename_as_id
        );

        self.require_known_space(id)?;

        if !path.is_dir() {
            log::error!("'{}' does not exist or is not a directory", path.display());
            return Err(Error::NotADirectory(path.to_owned()));
        }

        let walk = Walk { recurse, filename_as_id, stop };
        let added = self.walk(id, path, &walk)?;

        log::info!(
            "added {} images from {:?} to database space {}",
            added,
            path,
            id
        );

        Ok(added)
    }

    fn walk(&self, id: SpaceId, dir: &Path, walk: &Walk<'_>) -> Result<usize> {
        let mut added = 0;

        let entries = maybe!(fs::read_dir(dir)).map_err(|e| annotate!(e))?;

        for entry in entries {
            if walk.stop.load(Ordering::Acquire) {
                log::info!(
                    "ingestion of {:?} stopped after {} additions",
                    dir,
                    added
                );
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::error!("skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let path = entry.path();

            // does not follow symlinks, so a link back up the tree is
            // just another non-image file
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(e) => {
                    log::error!("skipping {:?}: {}", path, e);
                    continue;
                }
            };

            if is_dir {
                if walk.recurse {
                    match self.walk(id, &path, walk) {
                        Ok(n) => added += n,
                        Err(e @ Error::UnknownSpace(_)) => return Err(e),
                        Err(e) => {
                            log::error!("skipping directory {:?}: {}", path, e)
                        }
                    }
                }
                continue;
            }

            if !is_supported_image(&path) {
                continue;
            }

            let image = if walk.filename_as_id {
                match image_id_from_file_name(&path) {
                    Some(image) => Some(image),
                    None => {
                        log::error!(
                            "can not get id from filename {:?}, skipping",
                            path
                        );
                        continue;
                    }
                }
            } else {
                None
            };

            // looked up per file, the space may be replaced mid-walk
            if self.add_image_to(id, ImageSource::Path(&path), image)? {
                added += 1;
            }
        }

        Ok(added)
    }
}
