use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};

use crate::stats::now;
use crate::*;

type Spaces = FnvHashMap<SpaceId, Arc<Mutex<DatabaseSpace>>>;

/// The registry of database spaces sitting in front of an `Engine`.
///
/// An `ImgDb` is created once and shared between request handlers,
/// typically behind an `Arc`. Every space-scoped operation first checks
/// that the space is known and fails with `Error::UnknownSpace` without
/// touching the engine otherwise.
///
/// Locks are always taken in the order "space map, then space", and a
/// space lock is never held while waiting for the space map.
pub struct ImgDb<E> {
    engine: E,
    config: RwLock<Config>,
    spaces: RwLock<Spaces>,
    global_file_name: Mutex<PathBuf>,
}

impl<E> fmt::Debug for ImgDb<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spaces = self.spaces.read();
        let mut ids: Vec<&SpaceId> = spaces.keys().collect();
        ids.sort();
        f.debug_struct("ImgDb")
            .field("spaces", &ids)
            .field("global_file_name", &*self.global_file_name.lock())
            .finish()
    }
}

impl<E: Engine> ImgDb<E> {
    /// Create an empty registry. Spaces the engine may already hold are
    /// not adopted until they are created, loaded, or `load_all` runs.
    pub fn new(engine: E, config: Config) -> ImgDb<E> {
        ImgDb {
            engine,
            global_file_name: Mutex::new(config.get_global_file_name()),
            config: RwLock::new(config),
            spaces: RwLock::new(Spaces::default()),
        }
    }

    /// The engine behind this registry.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Swap the configuration. Adds that succeed afterwards see the new
    /// autosave settings.
    pub fn set_config(&self, config: Config) {
        *self.config.write() = config;
    }

    /// The file `save_all(None)` writes to.
    pub fn global_file_name(&self) -> PathBuf {
        self.global_file_name.lock().clone()
    }

    /// Looks up a known space. Callers that must not see the entry
    /// replaced while they work hold `spaces.read()` instead.
    pub(crate) fn space(
        &self,
        id: SpaceId,
    ) -> Result<Arc<Mutex<DatabaseSpace>>> {
        self.spaces.read().get(&id).cloned().ok_or(Error::UnknownSpace(id))
    }

    pub(crate) fn require_known_space(&self, id: SpaceId) -> Result<()> {
        if self.spaces.read().contains_key(&id) {
            Ok(())
        } else {
            Err(Error::UnknownSpace(id))
        }
    }

    /// Returns `true` if `id` is a space this registry manages.
    pub fn contains_space(&self, id: SpaceId) -> bool {
        self.spaces.read().contains_key(&id)
    }

    /// The ids of all managed spaces, in ascending order.
    pub fn space_ids(&self) -> Vec<SpaceId> {
        let mut ids: Vec<SpaceId> = self.spaces.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Asks the engine directly whether it holds an initialized space.
    pub fn is_valid_space(&self, id: SpaceId) -> bool {
        self.engine.is_space_valid(id)
    }

    /// Asks the engine directly which spaces it holds.
    pub fn engine_space_list(&self) -> Vec<SpaceId> {
        self.engine.space_list()
    }

    /// Create a space, replacing (and emptying) any existing one with the
    /// same id. If the engine can't empty it, the new cursor starts after
    /// the images it still holds.
    pub fn create_space(&self, id: SpaceId) -> SpaceId {
        log::debug!("create_space(id: {})", id);

        let mut spaces = self.spaces.write();

        if spaces.contains_key(&id) {
            log::warn!("replacing existing database space id: {}", id);
        }

        if !self.engine.is_space_valid(id) {
            log::debug!("new database space requires init: {}", id);
            self.engine.init_space(id);
        }

        let space = if self.engine.reset_space(id) {
            DatabaseSpace::new(id)
        } else {
            let image_count = self.engine.image_count(id);
            log::warn!(
                "engine failed to reset new database space {}, \
                 keeping its {} images and starting ids after them",
                id,
                image_count
            );
            DatabaseSpace::recovered(id, None, image_count)
        };

        spaces.insert(id, Arc::new(Mutex::new(space)));

        id
    }

    /// Empty a space. Returns `false`, leaving the space as it was, if the
    /// engine refused.
    pub fn reset_space(&self, id: SpaceId) -> Result<bool> {
        log::debug!("reset_space(id: {})", id);

        let mut spaces = self.spaces.write();

        if !spaces.contains_key(&id) {
            return Err(Error::UnknownSpace(id));
        }

        if !self.engine.reset_space(id) {
            log::error!("engine failed to reset database space {}", id);
            return Ok(false);
        }

        spaces.insert(id, Arc::new(Mutex::new(DatabaseSpace::new(id))));

        Ok(true)
    }

    /// Load a single space from `path`, overwriting whatever the space
    /// held before. Returns `None` and forgets the space if the engine
    /// could not load it.
    pub fn load_space<P: AsRef<Path>>(
        &self,
        id: SpaceId,
        path: P,
    ) -> Option<SpaceId> {
        let path = path.as_ref();
        log::debug!("load_space(id: {}, path: {:?})", id, path);

        let mut spaces = self.spaces.write();

        if self.engine.is_space_valid(id) {
            log::warn!("load is replacing existing database space id: {}", id);
            if !self.engine.reset_space(id) {
                log::error!("engine failed to reset database space {}", id);
            }
        } else {
            self.engine.init_space(id);
        }

        if !self.engine.load_space(id, path) {
            log::error!(
                "error loading database space {} from {:?}",
                id,
                path
            );
            spaces.remove(&id);
            if !self.engine.remove_space(id) {
                log::error!(
                    "engine failed to drop database space {} after a failed load",
                    id
                );
            }
            return None;
        }

        let space = DatabaseSpace::recovered(
            id,
            Some(path.to_owned()),
            self.engine.image_count(id),
        );

        log::info!("database space loaded: {}", space);

        spaces.insert(id, Arc::new(Mutex::new(space)));

        Some(id)
    }

    /// Remove a space from the engine and the registry.
    pub fn remove_space(&self, id: SpaceId) -> Result<bool> {
        log::debug!("remove_space(id: {})", id);

        let mut spaces = self.spaces.write();

        if !spaces.contains_key(&id) {
            return Err(Error::UnknownSpace(id));
        }

        if !self.engine.remove_space(id) {
            log::error!("engine failed to remove database space {}", id);
            return Ok(false);
        }

        spaces.remove(&id);

        Ok(true)
    }

    /// Save a space to the file it was last loaded from or saved to.
    pub fn save_space(&self, id: SpaceId) -> Result<bool> {
        log::debug!("save_space(id: {})", id);

        let spaces = self.spaces.read();
        let space = spaces.get(&id).ok_or(Error::UnknownSpace(id))?;
        let mut space = space.lock();

        let Some(path) = space.file_name.clone() else {
            log::error!(
                "database space {} has no file yet, use save_space_as",
                id
            );
            return Ok(false);
        };

        if !self.engine.save_space(id, &path) {
            log::error!("error saving database space {} to {:?}", id, path);
            return Ok(false);
        }

        space.mark_saved(now());

        Ok(true)
    }

    /// Save a space to `path`, which becomes its file from now on.
    pub fn save_space_as<P: AsRef<Path>>(
        &self,
        id: SpaceId,
        path: P,
    ) -> Result<bool> {
        let path = path.as_ref();
        log::debug!("save_space_as(id: {}, path: {:?})", id, path);

        let spaces = self.spaces.read();
        let space = spaces.get(&id).ok_or(Error::UnknownSpace(id))?;
        let mut space = space.lock();

        if !self.engine.save_space(id, path) {
            log::error!("error saving database space {} to {:?}", id, path);
            return Ok(false);
        }

        space.file_name = Some(path.to_owned());
        space.mark_saved(now());

        log::info!("database space {} saved to {:?}", id, path);

        Ok(true)
    }

    /// Load every space stored in `path`, replacing the registry's
    /// contents with exactly the spaces the engine holds afterwards.
    ///
    /// Returns the number of spaces loaded, or 0 if the engine failed.
    pub fn load_all<P: AsRef<Path>>(&self, path: P) -> usize {
        let path = path.as_ref();
        log::debug!("load_all(path: {:?})", path);

        let mut spaces = self.spaces.write();

        match self.engine.load_all_spaces(path) {
            Ok(count) => {
                *spaces = self
                    .engine
                    .space_list()
                    .into_iter()
                    .map(|id| (id, self.recovered_space(id)))
                    .collect();

                *self.global_file_name.lock() = path.to_owned();

                log::info!(
                    "database file {:?} loaded with {} spaces",
                    path,
                    count
                );

                count
            }
            Err(e) => {
                log::error!(
                    "failed to load database spaces from {:?}: {}",
                    path,
                    e
                );
                self.reconcile(&mut spaces);
                0
            }
        }
    }

    /// Save every space into a single file, by default the global one.
    /// An explicit `path` does not become the new default.
    pub fn save_all(&self, path: Option<&Path>) -> bool {
        let spaces = self.spaces.write();

        let path = match path {
            Some(path) => path.to_owned(),
            None => self.global_file_name.lock().clone(),
        };

        log::debug!("save_all(path: {:?})", path);

        if !self.engine.save_all_spaces(&path) {
            log::error!("error saving database spaces to {:?}", path);
            return false;
        }

        for space in spaces.values() {
            space.lock().stats.adds_since_last_save = 0;
        }

        log::info!("all database spaces saved at {:?}", path);

        true
    }

    /// Shut the engine down.
    pub fn close(&self) -> bool {
        log::debug!("close()");
        self.engine.close()
    }

    fn recovered_space(&self, id: SpaceId) -> Arc<Mutex<DatabaseSpace>> {
        Arc::new(Mutex::new(DatabaseSpace::recovered(
            id,
            None,
            self.engine.image_count(id),
        )))
    }

    /// Makes the registry hold exactly the engine's spaces, keeping the
    /// bookkeeping of spaces that survived.
    fn reconcile(&self, spaces: &mut Spaces) {
        let valid = self.engine.space_list();

        spaces.retain(|id, _| {
            let keep = valid.contains(id);
            if !keep {
                log::warn!("dropping database space {} unknown to engine", id);
            }
            keep
        });

        for id in valid {
            spaces.entry(id).or_insert_with(|| self.recovered_space(id));
        }
    }

    /// Add an image, assigning the next free id when `image` is `None`.
    ///
    /// Returns `false` if the engine refused the image. A successful add
    /// may trigger a save of all spaces, depending on the configured
    /// autosave policy.
    pub fn add_image<'a, S: Into<ImageSource<'a>>>(
        &self,
        id: SpaceId,
        source: S,
        image: Option<ImageId>,
    ) -> Result<bool> {
        self.add_image_to(id, source.into(), image)
    }

    pub(crate) fn add_image_to(
        &self,
        id: SpaceId,
        source: ImageSource<'_>,
        image: Option<ImageId>,
    ) -> Result<bool> {
        // the map stays read-locked until the cursor is updated, so a
        // reset or reload can't swap the entry out under an engine add
        let spaces = self.spaces.read();
        let space = spaces.get(&id).ok_or(Error::UnknownSpace(id))?;
        let mut space = space.lock();
        let image = image.unwrap_or(space.next_id);

        log::debug!(
            "add_image(space: {}, image: {}, source: {:?})",
            id,
            image,
            source
        );

        space.stats.count_add();

        if !self.engine.add_image(id, image, source) {
            log::error!("engine failed to add image {} to space {}", image, id);
            return Ok(false);
        }

        space.advance_cursor(image);
        space.stats.adds_since_last_save += 1;

        let now = now();
        let autosave = self.config.read().autosave_due(space.last_save_time, now);
        if autosave {
            space.mark_saved(now);
        }
        drop(space);
        drop(spaces);

        if autosave {
            log::debug!("automatic save triggered by space {}", id);
            self.save_all(None);
        }

        Ok(true)
    }

    /// Remove an image from a space.
    pub fn remove_image(&self, id: SpaceId, image: ImageId) -> Result<bool> {
        log::debug!("remove_image(space: {}, image: {})", id, image);
        self.require_known_space(id)?;
        Ok(self.engine.remove_image(id, image))
    }

    fn query_with<F>(
        &self,
        id: SpaceId,
        num_results: usize,
        op: &str,
        query: F,
    ) -> Result<Vec<Match>>
    where
        F: FnOnce(usize) -> Vec<(ImageId, f64)>,
    {
        let space = self.space(id)?;
        space.lock().stats.count_query();

        // one more than asked for is passed on to the caller as-is
        let raw = query(num_results.saturating_add(1));
        let res = normalize_results(&raw);

        log::debug!("{}() ret={:?}", op, res);

        Ok(res)
    }

    /// Find the images most similar to an image already in the space.
    /// The best match comes first.
    pub fn query_by_id(
        &self,
        id: SpaceId,
        image: ImageId,
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Result<Vec<Match>> {
        self.query_with(id, num_results, "query_by_id", |n| {
            self.engine.query_by_id(id, image, n, mode, fast)
        })
    }

    /// Find the images most similar to an encoded image in memory.
    pub fn query_by_blob(
        &self,
        id: SpaceId,
        blob: &[u8],
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Result<Vec<Match>> {
        self.query_with(id, num_results, "query_by_blob", |n| {
            self.engine.query_by_blob(id, blob, n, mode, fast)
        })
    }

    /// Find the images most similar to an image file.
    pub fn query_by_path<P: AsRef<Path>>(
        &self,
        id: SpaceId,
        path: P,
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Result<Vec<Match>> {
        let path = path.as_ref();
        self.query_with(id, num_results, "query_by_path", |n| {
            self.engine.query_by_path(id, path, n, mode, fast)
        })
    }

    /// Like `query_by_id`, restricted to images carrying `keywords`.
    pub fn query_by_id_keywords(
        &self,
        id: SpaceId,
        image: ImageId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
        fast: bool,
    ) -> Result<Vec<Match>> {
        self.query_with(id, num_results, "query_by_id_keywords", |n| {
            self.engine.query_by_id_keywords(id, image, n, join, keywords, fast)
        })
    }

    /// The engine's fast keyword query, forwarded as-is: raw
    /// `(image, distance)` pairs in engine order, exactly `num_results`
    /// requested, and not counted as a query.
    pub fn query_by_id_fast_keywords(
        &self,
        id: SpaceId,
        image: ImageId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
    ) -> Result<Vec<(ImageId, f64)>> {
        self.require_known_space(id)?;
        Ok(self.engine.query_by_id_keywords(
            id,
            image,
            num_results,
            join,
            keywords,
            true,
        ))
    }

    /// Queries run against a space since it was created or last replaced.
    pub fn query_count(&self, id: SpaceId) -> Result<u64> {
        Ok(self.space(id)?.lock().stats.query_count())
    }

    /// Queries counted during the last completed minute.
    pub fn query_per_minute(&self, id: SpaceId) -> Result<u64> {
        Ok(self.space(id)?.lock().stats.query_per_minute())
    }

    /// Attempted adds, including ones the engine refused.
    pub fn add_count(&self, id: SpaceId) -> Result<u64> {
        Ok(self.space(id)?.lock().stats.add_count())
    }

    /// Adds counted during the last completed minute.
    pub fn add_per_minute(&self, id: SpaceId) -> Result<u64> {
        Ok(self.space(id)?.lock().stats.add_per_minute())
    }

    /// A copy of a space's bookkeeping.
    pub fn space_snapshot(&self, id: SpaceId) -> Result<DatabaseSpace> {
        Ok(self.space(id)?.lock().clone())
    }

    /// A copy of a space's bookkeeping along with its image count.
    pub fn space_info(&self, id: SpaceId) -> Result<SpaceInfo> {
        let space = self.space_snapshot(id)?;
        Ok(SpaceInfo::new(&space, self.engine.image_count(id)))
    }

    /// `SpaceInfo` for every managed space.
    pub fn detailed_list(&self) -> BTreeMap<SpaceId, SpaceInfo> {
        let spaces: Vec<Arc<Mutex<DatabaseSpace>>> =
            self.spaces.read().values().cloned().collect();

        spaces
            .into_iter()
            .map(|space| {
                let space = space.lock().clone();
                let info = SpaceInfo::new(&space, self.engine.image_count(space.id));
                (space.id, info)
            })
            .collect()
    }

    /// Number of images the engine holds for a space.
    pub fn image_count(&self, id: SpaceId) -> Result<usize> {
        self.require_known_space(id)?;
        Ok(self.engine.image_count(id))
    }

    /// Ids of every image in a space.
    pub fn image_list(&self, id: SpaceId) -> Result<Vec<ImageId>> {
        self.require_known_space(id)?;
        Ok(self.engine.image_list(id))
    }

    /// Returns `true` if the space holds `image`.
    pub fn is_image_on_db(&self, id: SpaceId, image: ImageId) -> Result<bool> {
        self.require_known_space(id)?;
        Ok(self.engine.is_image_on_db(id, image))
    }

    /// Width and height of a stored image.
    pub fn image_dimensions(
        &self,
        id: SpaceId,
        image: ImageId,
    ) -> Result<(u32, u32)> {
        self.require_known_space(id)?;
        Ok((
            self.engine.image_width(id, image),
            self.engine.image_height(id, image),
        ))
    }

    /// Average luminance of an image, per color channel.
    pub fn image_avgl(&self, id: SpaceId, image: ImageId) -> Result<Vec<f64>> {
        self.require_known_space(id)?;
        Ok(self.engine.image_avgl(id, image))
    }

    /// A bloom filter over the image ids of a space, as the engine builds it.
    pub fn ids_bloom_filter(&self, id: SpaceId) -> Result<Vec<u8>> {
        self.require_known_space(id)?;
        Ok(self.engine.ids_bloom_filter(id))
    }

    /// Visual distance between two images of a space.
    pub fn calc_diff(&self, id: SpaceId, a: ImageId, b: ImageId) -> Result<f64> {
        self.require_known_space(id)?;
        Ok(self.engine.calc_diff(id, a, b))
    }

    /// Distance between the average luminance of two images.
    pub fn calc_avgl_diff(
        &self,
        id: SpaceId,
        a: ImageId,
        b: ImageId,
    ) -> Result<f64> {
        self.require_known_space(id)?;
        Ok(self.engine.calc_avgl_diff(id, a, b))
    }

    /// Tag an image with a keyword.
    pub fn add_keyword_img(
        &self,
        id: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> Result<bool> {
        log::debug!(
            "add_keyword_img(space: {}, image: {}, keyword: {})",
            id,
            image,
            keyword
        );
        self.require_known_space(id)?;
        Ok(self.engine.add_keyword_img(id, image, keyword))
    }

    /// Tag an image with several keywords.
    pub fn add_keywords_img(
        &self,
        id: SpaceId,
        image: ImageId,
        keywords: &[Keyword],
    ) -> Result<bool> {
        log::debug!(
            "add_keywords_img(space: {}, image: {}, keywords: {:?})",
            id,
            image,
            keywords
        );
        self.require_known_space(id)?;
        Ok(self.engine.add_keywords_img(id, image, keywords))
    }

    /// Remove one keyword from an image.
    pub fn remove_keyword_img(
        &self,
        id: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> Result<bool> {
        log::debug!(
            "remove_keyword_img(space: {}, image: {}, keyword: {})",
            id,
            image,
            keyword
        );
        self.require_known_space(id)?;
        Ok(self.engine.remove_keyword_img(id, image, keyword))
    }

    /// Remove every keyword from an image.
    pub fn remove_all_keywords_img(
        &self,
        id: SpaceId,
        image: ImageId,
    ) -> Result<bool> {
        log::debug!("remove_all_keywords_img(space: {}, image: {})", id, image);
        self.require_known_space(id)?;
        Ok(self.engine.remove_all_keywords_img(id, image))
    }

    /// Keywords an image is tagged with.
    pub fn keywords_img(
        &self,
        id: SpaceId,
        image: ImageId,
    ) -> Result<Vec<Keyword>> {
        self.require_known_space(id)?;
        let res = self.engine.keywords_img(id, image);
        log::debug!("keywords_img() ret={:?}", res);
        Ok(res)
    }

    /// Up to `num_results` images carrying `keywords`.
    pub fn all_imgs_by_keywords(
        &self,
        id: SpaceId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
    ) -> Result<Vec<ImageId>> {
        self.require_known_space(id)?;
        Ok(self.engine.all_imgs_by_keywords(id, num_results, join, keywords))
    }

    /// Cluster the images carrying `keywords` by visual similarity.
    pub fn cluster_keywords(
        &self,
        id: SpaceId,
        num_clusters: usize,
        keywords: &[Keyword],
    ) -> Result<Vec<Cluster>> {
        self.require_known_space(id)?;
        Ok(self.engine.cluster_keywords(id, num_clusters, keywords))
    }

    /// Cluster every image of a space by visual similarity.
    pub fn cluster_space(
        &self,
        id: SpaceId,
        num_clusters: usize,
    ) -> Result<Vec<Cluster>> {
        self.require_known_space(id)?;
        Ok(self.engine.cluster_space(id, num_clusters))
    }

    /// The most used keywords in a space.
    pub fn keywords_popular(
        &self,
        id: SpaceId,
        num_results: usize,
    ) -> Result<Vec<Keyword>> {
        self.require_known_space(id)?;
        Ok(self.engine.keywords_popular(id, num_results))
    }

    /// How visually far apart the images carrying each keyword are.
    pub fn keywords_visual_distance(
        &self,
        id: SpaceId,
        distance_type: u32,
        keywords: &[Keyword],
    ) -> Result<f64> {
        self.require_known_space(id)?;
        Ok(self.engine.keywords_visual_distance(id, distance_type, keywords))
    }

    /// Keywords most common among `images`, skipping `excluded`, with
    /// their counts.
    pub fn most_popular_keywords(
        &self,
        id: SpaceId,
        images: &[ImageId],
        excluded: &[Keyword],
        count: usize,
        mode: u32,
    ) -> Result<Vec<(Keyword, usize)>> {
        self.require_known_space(id)?;
        let res =
            self.engine.most_popular_keywords(id, images, excluded, count, mode);
        log::debug!("most_popular_keywords() ret={:?}", res);
        Ok(res)
    }
}
