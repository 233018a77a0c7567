use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ImageId, SpaceId, SpaceStats};

/// What a space's file name reads as before it was ever loaded or saved.
pub const UNSAVED_FILE_NAME: &str = "not yet saved";

/// Registry-side bookkeeping for one logical index space.
///
/// The engine owns the images; this owns everything the engine does not
/// track: usage stats, the backing file, and the id cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpace {
    pub(crate) id: SpaceId,
    pub(crate) stats: SpaceStats,
    pub(crate) file_name: Option<PathBuf>,
    pub(crate) next_id: ImageId,
    pub(crate) last_save_time: Duration,
}

impl DatabaseSpace {
    pub(crate) fn new(id: SpaceId) -> DatabaseSpace {
        DatabaseSpace {
            id,
            stats: SpaceStats::default(),
            file_name: None,
            next_id: 1,
            last_save_time: Duration::ZERO,
        }
    }

    /// A fresh space whose cursor continues after `image_count` images,
    /// as recovered from a file.
    pub(crate) fn recovered(
        id: SpaceId,
        file_name: Option<PathBuf>,
        image_count: usize,
    ) -> DatabaseSpace {
        DatabaseSpace {
            file_name,
            next_id: image_count as ImageId + 1,
            ..DatabaseSpace::new(id)
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn stats(&self) -> &SpaceStats {
        &self.stats
    }

    /// The file this space was last loaded from or saved to.
    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// The id handed to the next add that does not bring its own.
    pub fn next_id(&self) -> ImageId {
        self.next_id
    }

    /// Time since the epoch of the last successful save, zero if never.
    pub fn last_save_time(&self) -> Duration {
        self.last_save_time
    }

    /// Moves the cursor past `used`, never backwards.
    pub(crate) fn advance_cursor(&mut self, used: ImageId) {
        self.next_id = self.next_id.max(used.saturating_add(1));
    }

    pub(crate) fn mark_saved(&mut self, at: Duration) {
        self.last_save_time = at;
        self.stats.adds_since_last_save = 0;
    }
}

impl fmt::Display for DatabaseSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DatabaseSpace {{ id: {}, adds: {}, queries: {}, next_id: {}, file: {} }}",
            self.id,
            self.stats.add_count(),
            self.stats.query_count(),
            self.next_id,
            self.file_name
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| UNSAVED_FILE_NAME.to_owned()),
        )
    }
}

/// A point-in-time copy of a space's bookkeeping, along with the engine's
/// image count for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub id: SpaceId,
    pub image_count: usize,
    pub stats: SpaceStats,
    pub next_id: ImageId,
    pub last_save_time: Duration,
    pub file_name: Option<PathBuf>,
}

impl SpaceInfo {
    pub(crate) fn new(space: &DatabaseSpace, image_count: usize) -> SpaceInfo {
        SpaceInfo {
            id: space.id,
            image_count,
            stats: space.stats.clone(),
            next_id: space.next_id,
            last_save_time: space.last_save_time,
            file_name: space.file_name.clone(),
        }
    }
}
