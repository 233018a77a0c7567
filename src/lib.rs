//! `imgdb` manages many independent image index spaces in front of an
//! external image-similarity engine.
//!
//! The engine does the real work: storing image signatures, scoring
//! similarity, and persisting its own files. `ImgDb` keeps track of which
//! spaces exist, counts adds and queries per space, hands out image ids,
//! saves automatically after enough time has passed, turns raw engine
//! distances into 0-100 similarity scores, and ingests whole directories
//! of images.
//!
//! The engine is anything implementing [`Engine`]. An `ImgDb` is built
//! once with [`Config::open`] (or [`ImgDb::new`]) and shared between
//! threads.
#![deny(future_incompatible)]
#![deny(nonstandard_style)]
#![deny(rust_2018_idioms)]

mod config;
mod db;
mod engine;
mod ingest;
mod normalize;
mod result;
mod space;
mod stats;

pub use self::{
    config::{Config, DEFAULT_GLOBAL_FILE_NAME},
    db::ImgDb,
    engine::{Cluster, Engine, ImageSource, KeywordJoin, QueryMode},
    ingest::{SUPPORTED_IMG_EXTS, image_id_from_file_name, is_supported_image},
    normalize::{
        Match, SCORE_NORMALIZATION_FACTOR, normalize_results, normalize_score,
    },
    result::{Error, Result},
    space::{DatabaseSpace, SpaceInfo, UNSAVED_FILE_NAME},
    stats::{MinuteCounter, SpaceStats},
};

/// Identifies a database space.
pub type SpaceId = u32;

/// Identifies an image within a space.
pub type ImageId = u64;

/// An opaque keyword handle, usually a hash of the keyword text.
pub type Keyword = i64;
