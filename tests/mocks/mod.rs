// An in-memory stand-in for the image engine. It keeps images and keywords
// in ordered maps, "persists" files into a map keyed by path, records the
// name of every call it receives, and can be told to fail individual
// primitives.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::{Condvar, Mutex};

use imgdb::{
    Cluster, Engine, Error, ImageId, ImageSource, Keyword, KeywordJoin,
    QueryMode, Result, SpaceId,
};

type Images = BTreeMap<ImageId, Vec<Keyword>>;
type Snapshot = BTreeMap<SpaceId, Images>;

#[derive(Debug, Default)]
struct State {
    spaces: Snapshot,
    files: BTreeMap<PathBuf, Snapshot>,
    calls: Vec<&'static str>,
    failing: BTreeSet<&'static str>,
    rejected_images: BTreeSet<ImageId>,
    query_results: Vec<(ImageId, f64)>,
    requested_results: Vec<usize>,
    added_sources: Vec<String>,
}

#[derive(Debug, Default)]
struct Gate {
    closed: bool,
    waiting: usize,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<State>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

impl MockEngine {
    pub fn new() -> MockEngine {
        MockEngine::default()
    }

    /// Make the named primitive report failure until `succeed` is called.
    pub fn fail(&self, call: &'static str) {
        self.state.lock().failing.insert(call);
    }

    pub fn succeed(&self, call: &'static str) {
        self.state.lock().failing.remove(call);
    }

    /// Refuse to add this particular image id.
    pub fn reject_image(&self, image: ImageId) {
        self.state.lock().rejected_images.insert(image);
    }

    pub fn set_query_results(&self, results: Vec<(ImageId, f64)>) {
        self.state.lock().query_results = results;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// The `num_results` of every query received, in order.
    pub fn requested_results(&self) -> Vec<usize> {
        self.state.lock().requested_results.clone()
    }

    /// Debug renderings of every source handed to `add_image`.
    pub fn added_sources(&self) -> Vec<String> {
        self.state.lock().added_sources.clone()
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }

    /// Store a file as if it had been written earlier.
    pub fn seed_file(&self, path: &Path, spaces: &[(SpaceId, Vec<ImageId>)]) {
        let snapshot = spaces
            .iter()
            .map(|(space, images)| {
                (*space, images.iter().map(|i| (*i, vec![])).collect())
            })
            .collect();
        self.state.lock().files.insert(path.to_owned(), snapshot);
    }

    /// Create a space behind the registry's back.
    pub fn seed_space(&self, space: SpaceId, images: &[ImageId]) {
        self.state
            .lock()
            .spaces
            .insert(space, images.iter().map(|i| (*i, vec![])).collect());
    }

    pub fn images(&self, space: SpaceId) -> Vec<ImageId> {
        self.state
            .lock()
            .spaces
            .get(&space)
            .map(|images| images.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Hold every `add_image` call at the door until `open_gate`.
    pub fn close_gate(&self) {
        self.gate.lock().closed = true;
    }

    pub fn open_gate(&self) {
        self.gate.lock().closed = false;
        self.gate_changed.notify_all();
    }

    /// Block until `n` adds are waiting at the closed gate.
    pub fn wait_for_held_adds(&self, n: usize) {
        let mut gate = self.gate.lock();
        while gate.waiting < n {
            self.gate_changed.wait(&mut gate);
        }
    }

    // waits outside the state lock so other engine calls can proceed
    fn pass_gate(&self) {
        let mut gate = self.gate.lock();
        gate.waiting += 1;
        self.gate_changed.notify_all();
        while gate.closed {
            self.gate_changed.wait(&mut gate);
        }
        gate.waiting -= 1;
    }

    fn enter(&self, call: &'static str) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }
}

fn fails(state: &State, call: &str) -> bool {
    state.failing.contains(call)
}

fn clusters(images: Vec<ImageId>) -> Vec<Cluster> {
    match images.first() {
        Some(first) => vec![Cluster {
            representative: *first,
            members: images.clone(),
            diameter: 0.0,
        }],
        None => vec![],
    }
}

impl Engine for MockEngine {
    fn is_space_valid(&self, space: SpaceId) -> bool {
        self.enter("is_space_valid").spaces.contains_key(&space)
    }

    fn init_space(&self, space: SpaceId) {
        self.enter("init_space").spaces.entry(space).or_default();
    }

    fn reset_space(&self, space: SpaceId) -> bool {
        let mut state = self.enter("reset_space");
        if fails(&state, "reset_space") {
            return false;
        }
        match state.spaces.get_mut(&space) {
            Some(images) => {
                images.clear();
                true
            }
            None => false,
        }
    }

    fn remove_space(&self, space: SpaceId) -> bool {
        let mut state = self.enter("remove_space");
        if fails(&state, "remove_space") {
            return false;
        }
        state.spaces.remove(&space).is_some()
    }

    fn space_list(&self) -> Vec<SpaceId> {
        self.enter("space_list").spaces.keys().copied().collect()
    }

    fn load_space(&self, space: SpaceId, path: &Path) -> bool {
        let mut state = self.enter("load_space");
        if fails(&state, "load_space") {
            return false;
        }
        let loaded = state
            .files
            .get(path)
            .and_then(|snapshot| snapshot.values().next())
            .cloned();
        match loaded {
            Some(images) => {
                state.spaces.insert(space, images);
                true
            }
            None => false,
        }
    }

    fn save_space(&self, space: SpaceId, path: &Path) -> bool {
        let mut state = self.enter("save_space");
        if fails(&state, "save_space") {
            return false;
        }
        let Some(images) = state.spaces.get(&space).cloned() else {
            return false;
        };
        state.files.insert(path.to_owned(), [(space, images)].into());
        true
    }

    fn load_all_spaces(&self, path: &Path) -> Result<usize> {
        let mut state = self.enter("load_all_spaces");
        if fails(&state, "load_all_spaces") {
            return Err(Error::Engine("unable to read database file".into()));
        }
        match state.files.get(path).cloned() {
            Some(snapshot) => {
                let count = snapshot.len();
                state.spaces = snapshot;
                Ok(count)
            }
            None => Err(Error::Engine(format!("no such file: {:?}", path))),
        }
    }

    fn save_all_spaces(&self, path: &Path) -> bool {
        let mut state = self.enter("save_all_spaces");
        if fails(&state, "save_all_spaces") {
            return false;
        }
        let snapshot = state.spaces.clone();
        state.files.insert(path.to_owned(), snapshot);
        true
    }

    fn close(&self) -> bool {
        self.enter("close");
        true
    }

    fn add_image(
        &self,
        space: SpaceId,
        image: ImageId,
        source: ImageSource<'_>,
    ) -> bool {
        self.pass_gate();
        let mut state = self.enter("add_image");
        if fails(&state, "add_image") || state.rejected_images.contains(&image)
        {
            return false;
        }
        state.added_sources.push(format!("{:?}", source));
        match state.spaces.get_mut(&space) {
            Some(images) => {
                images.insert(image, vec![]);
                true
            }
            None => false,
        }
    }

    fn remove_image(&self, space: SpaceId, image: ImageId) -> bool {
        let mut state = self.enter("remove_image");
        state
            .spaces
            .get_mut(&space)
            .map(|images| images.remove(&image).is_some())
            .unwrap_or(false)
    }

    fn query_by_id(
        &self,
        _space: SpaceId,
        _image: ImageId,
        num_results: usize,
        _mode: QueryMode,
        _fast: bool,
    ) -> Vec<(ImageId, f64)> {
        let mut state = self.enter("query_by_id");
        state.requested_results.push(num_results);
        state.query_results.clone()
    }

    fn query_by_blob(
        &self,
        _space: SpaceId,
        _blob: &[u8],
        num_results: usize,
        _mode: QueryMode,
        _fast: bool,
    ) -> Vec<(ImageId, f64)> {
        let mut state = self.enter("query_by_blob");
        state.requested_results.push(num_results);
        state.query_results.clone()
    }

    fn query_by_path(
        &self,
        _space: SpaceId,
        _path: &Path,
        num_results: usize,
        _mode: QueryMode,
        _fast: bool,
    ) -> Vec<(ImageId, f64)> {
        let mut state = self.enter("query_by_path");
        state.requested_results.push(num_results);
        state.query_results.clone()
    }

    fn query_by_id_keywords(
        &self,
        _space: SpaceId,
        _image: ImageId,
        num_results: usize,
        _join: KeywordJoin,
        _keywords: &[Keyword],
        _fast: bool,
    ) -> Vec<(ImageId, f64)> {
        let mut state = self.enter("query_by_id_keywords");
        state.requested_results.push(num_results);
        state.query_results.clone()
    }

    fn image_count(&self, space: SpaceId) -> usize {
        self.enter("image_count").spaces.get(&space).map_or(0, BTreeMap::len)
    }

    fn image_list(&self, space: SpaceId) -> Vec<ImageId> {
        self.enter("image_list")
            .spaces
            .get(&space)
            .map(|images| images.keys().copied().collect())
            .unwrap_or_default()
    }

    fn is_image_on_db(&self, space: SpaceId, image: ImageId) -> bool {
        self.enter("is_image_on_db")
            .spaces
            .get(&space)
            .is_some_and(|images| images.contains_key(&image))
    }

    fn image_width(&self, _space: SpaceId, _image: ImageId) -> u32 {
        self.enter("image_width");
        640
    }

    fn image_height(&self, _space: SpaceId, _image: ImageId) -> u32 {
        self.enter("image_height");
        480
    }

    fn image_avgl(&self, _space: SpaceId, _image: ImageId) -> Vec<f64> {
        self.enter("image_avgl");
        vec![0.5, 0.25, 0.125]
    }

    fn ids_bloom_filter(&self, space: SpaceId) -> Vec<u8> {
        let state = self.enter("ids_bloom_filter");
        let mut bits = vec![0_u8; 8];
        for image in state.spaces.get(&space).into_iter().flat_map(|i| i.keys()) {
            let bit = (image % 64) as usize;
            bits[bit / 8] |= 1 << (bit % 8);
        }
        bits
    }

    fn calc_diff(&self, _space: SpaceId, a: ImageId, b: ImageId) -> f64 {
        self.enter("calc_diff");
        a.abs_diff(b) as f64
    }

    fn calc_avgl_diff(&self, _space: SpaceId, a: ImageId, b: ImageId) -> f64 {
        self.enter("calc_avgl_diff");
        a.abs_diff(b) as f64 / 2.0
    }

    fn add_keyword_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> bool {
        self.add_keywords_img(space, image, &[keyword])
    }

    fn add_keywords_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keywords: &[Keyword],
    ) -> bool {
        let mut state = self.enter("add_keywords_img");
        match state.spaces.get_mut(&space).and_then(|i| i.get_mut(&image)) {
            Some(existing) => {
                for kw in keywords {
                    if !existing.contains(kw) {
                        existing.push(*kw);
                    }
                }
                true
            }
            None => false,
        }
    }

    fn remove_keyword_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> bool {
        let mut state = self.enter("remove_keyword_img");
        match state.spaces.get_mut(&space).and_then(|i| i.get_mut(&image)) {
            Some(existing) => {
                let before = existing.len();
                existing.retain(|kw| *kw != keyword);
                existing.len() != before
            }
            None => false,
        }
    }

    fn remove_all_keywords_img(&self, space: SpaceId, image: ImageId) -> bool {
        let mut state = self.enter("remove_all_keywords_img");
        match state.spaces.get_mut(&space).and_then(|i| i.get_mut(&image)) {
            Some(existing) => {
                existing.clear();
                true
            }
            None => false,
        }
    }

    fn keywords_img(&self, space: SpaceId, image: ImageId) -> Vec<Keyword> {
        self.enter("keywords_img")
            .spaces
            .get(&space)
            .and_then(|i| i.get(&image))
            .cloned()
            .unwrap_or_default()
    }

    fn all_imgs_by_keywords(
        &self,
        space: SpaceId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
    ) -> Vec<ImageId> {
        let state = self.enter("all_imgs_by_keywords");
        let Some(images) = state.spaces.get(&space) else {
            return vec![];
        };
        images
            .iter()
            .filter(|(_, kws)| match join {
                KeywordJoin::Or => keywords.iter().any(|k| kws.contains(k)),
                KeywordJoin::And => keywords.iter().all(|k| kws.contains(k)),
            })
            .map(|(id, _)| *id)
            .take(num_results)
            .collect()
    }

    fn cluster_keywords(
        &self,
        space: SpaceId,
        _num_clusters: usize,
        keywords: &[Keyword],
    ) -> Vec<Cluster> {
        let state = self.enter("cluster_keywords");
        let images = state
            .spaces
            .get(&space)
            .into_iter()
            .flatten()
            .filter(|(_, kws)| keywords.iter().any(|k| kws.contains(k)))
            .map(|(id, _)| *id)
            .collect();
        clusters(images)
    }

    fn cluster_space(&self, space: SpaceId, _num_clusters: usize) -> Vec<Cluster> {
        let state = self.enter("cluster_space");
        let images = state
            .spaces
            .get(&space)
            .map(|images| images.keys().copied().collect())
            .unwrap_or_default();
        clusters(images)
    }

    fn keywords_popular(&self, space: SpaceId, num_results: usize) -> Vec<Keyword> {
        let state = self.enter("keywords_popular");
        let mut counts: BTreeMap<Keyword, usize> = BTreeMap::new();
        for kws in state.spaces.get(&space).into_iter().flat_map(|i| i.values()) {
            for kw in kws {
                *counts.entry(*kw).or_default() += 1;
            }
        }
        let mut counts: Vec<(Keyword, usize)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.into_iter().take(num_results).map(|(kw, _)| kw).collect()
    }

    fn keywords_visual_distance(
        &self,
        _space: SpaceId,
        _distance_type: u32,
        keywords: &[Keyword],
    ) -> f64 {
        self.enter("keywords_visual_distance");
        keywords.len() as f64
    }

    fn most_popular_keywords(
        &self,
        space: SpaceId,
        images: &[ImageId],
        excluded: &[Keyword],
        count: usize,
        _mode: u32,
    ) -> Vec<(Keyword, usize)> {
        let state = self.enter("most_popular_keywords");
        let mut counts: BTreeMap<Keyword, usize> = BTreeMap::new();
        if let Some(stored) = state.spaces.get(&space) {
            for image in images {
                for kw in stored.get(image).into_iter().flatten() {
                    if !excluded.contains(kw) {
                        *counts.entry(*kw).or_default() += 1;
                    }
                }
            }
        }
        let mut counts: Vec<(Keyword, usize)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(count);
        counts
    }
}
