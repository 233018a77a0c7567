//! The contract between the registry and the image-similarity engine.
//!
//! The engine stores signatures, scores similarity, and persists its own
//! files. Every call is synchronous and reports success through its
//! return value; the registry never retries.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ImageId, Keyword, Result, SpaceId};

/// Where the pixels of an image come from.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// An image file the engine decodes itself.
    Path(&'a Path),
    /// An encoded image already in memory.
    Blob(&'a [u8]),
}

impl fmt::Debug for ImageSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "Path({:?})", path),
            // blobs can be megabytes, only show the size
            ImageSource::Blob(blob) => write!(f, "Blob({} bytes)", blob.len()),
        }
    }
}

impl<'a> From<&'a PathBuf> for ImageSource<'a> {
    fn from(path: &'a PathBuf) -> ImageSource<'a> {
        ImageSource::Path(path)
    }
}

impl<'a> From<&'a Path> for ImageSource<'a> {
    fn from(path: &'a Path) -> ImageSource<'a> {
        ImageSource::Path(path)
    }
}

impl<'a> From<&'a [u8]> for ImageSource<'a> {
    fn from(blob: &'a [u8]) -> ImageSource<'a> {
        ImageSource::Blob(blob)
    }
}

/// How the query image was produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    #[default]
    Photo,
    /// A hand-drawn sketch; the engine weighs coefficients differently.
    Sketch,
}

/// How multiple keywords restrict a query.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeywordJoin {
    /// Images carrying any of the keywords.
    #[default]
    Or,
    /// Images carrying all of the keywords.
    And,
}

/// A group of visually similar images, as computed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub representative: ImageId,
    pub members: Vec<ImageId>,
    pub diameter: f64,
}

/// The image-similarity engine. Implementations must be safe to call from
/// many threads and serialize conflicting work on the same space
/// themselves.
///
/// Raw query results are `(image, distance)` pairs ordered from least to
/// most similar, where a smaller distance is more similar.
pub trait Engine: Send + Sync {
    fn is_space_valid(&self, space: SpaceId) -> bool;
    fn init_space(&self, space: SpaceId);
    fn reset_space(&self, space: SpaceId) -> bool;
    fn remove_space(&self, space: SpaceId) -> bool;
    fn space_list(&self) -> Vec<SpaceId>;

    fn load_space(&self, space: SpaceId, path: &Path) -> bool;
    fn save_space(&self, space: SpaceId, path: &Path) -> bool;
    /// Loads every space stored in `path`, returning how many were loaded.
    /// May fail outright when the file cannot be read.
    fn load_all_spaces(&self, path: &Path) -> Result<usize>;
    fn save_all_spaces(&self, path: &Path) -> bool;
    fn close(&self) -> bool;

    fn add_image(
        &self,
        space: SpaceId,
        image: ImageId,
        source: ImageSource<'_>,
    ) -> bool;
    fn remove_image(&self, space: SpaceId, image: ImageId) -> bool;

    fn query_by_id(
        &self,
        space: SpaceId,
        image: ImageId,
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Vec<(ImageId, f64)>;
    fn query_by_blob(
        &self,
        space: SpaceId,
        blob: &[u8],
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Vec<(ImageId, f64)>;
    fn query_by_path(
        &self,
        space: SpaceId,
        path: &Path,
        num_results: usize,
        mode: QueryMode,
        fast: bool,
    ) -> Vec<(ImageId, f64)>;
    fn query_by_id_keywords(
        &self,
        space: SpaceId,
        image: ImageId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
        fast: bool,
    ) -> Vec<(ImageId, f64)>;

    fn image_count(&self, space: SpaceId) -> usize;
    fn image_list(&self, space: SpaceId) -> Vec<ImageId>;
    fn is_image_on_db(&self, space: SpaceId, image: ImageId) -> bool;
    fn image_width(&self, space: SpaceId, image: ImageId) -> u32;
    fn image_height(&self, space: SpaceId, image: ImageId) -> u32;
    /// Average luminance per color channel.
    fn image_avgl(&self, space: SpaceId, image: ImageId) -> Vec<f64>;
    fn ids_bloom_filter(&self, space: SpaceId) -> Vec<u8>;
    fn calc_diff(&self, space: SpaceId, a: ImageId, b: ImageId) -> f64;
    fn calc_avgl_diff(&self, space: SpaceId, a: ImageId, b: ImageId) -> f64;

    fn add_keyword_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> bool;
    fn add_keywords_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keywords: &[Keyword],
    ) -> bool;
    fn remove_keyword_img(
        &self,
        space: SpaceId,
        image: ImageId,
        keyword: Keyword,
    ) -> bool;
    fn remove_all_keywords_img(&self, space: SpaceId, image: ImageId) -> bool;
    fn keywords_img(&self, space: SpaceId, image: ImageId) -> Vec<Keyword>;
    fn all_imgs_by_keywords(
        &self,
        space: SpaceId,
        num_results: usize,
        join: KeywordJoin,
        keywords: &[Keyword],
    ) -> Vec<ImageId>;
    fn cluster_keywords(
        &self,
        space: SpaceId,
        num_clusters: usize,
        keywords: &[Keyword],
    ) -> Vec<Cluster>;
    fn cluster_space(&self, space: SpaceId, num_clusters: usize) -> Vec<Cluster>;
    fn keywords_popular(&self, space: SpaceId, num_results: usize) -> Vec<Keyword>;
    fn keywords_visual_distance(
        &self,
        space: SpaceId,
        distance_type: u32,
        keywords: &[Keyword],
    ) -> f64;
    /// Keywords most common among `images`, with their occurrence counts.
    fn most_popular_keywords(
        &self,
        space: SpaceId,
        images: &[ImageId],
        excluded: &[Keyword],
        count: usize,
        mode: u32,
    ) -> Vec<(Keyword, usize)>;
}
