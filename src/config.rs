use std::path::PathBuf;
use std::time::Duration;

use crate::ImgDb;

/// The whole-registry file used by `ImgDb::save_all` before any
/// `load_all` picked a real one.
pub const DEFAULT_GLOBAL_FILE_NAME: &str = "global-imgdb-not-saved-yet";

/// Top-level configuration for the registry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// let config = imgdb::Config::new()
///     .automatic_save(true)
///     .save_interval(Duration::from_secs(30));
/// assert_eq!(config.get_save_interval(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    automatic_save: bool,
    save_interval: Duration,
    global_file_name: PathBuf,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            automatic_save: true,
            save_interval: Duration::from_secs(120),
            global_file_name: DEFAULT_GLOBAL_FILE_NAME.into(),
        }
    }
}

macro_rules! builder {
    ($(($name:ident, $get:ident, $set:ident, $t:ty, $desc:expr)),*) => {
        $(
            #[doc="Get "]
            #[doc=$desc]
            pub fn $get(&self) -> $t {
                self.$name.clone()
            }

            #[doc="Set "]
            #[doc=$desc]
            pub fn $set(&mut self, to: $t) {
                self.$name = to;
            }

            #[doc="Builder, set "]
            #[doc=$desc]
            pub fn $name(mut self, to: $t) -> Config {
                self.$name = to;
                self
            }
        )*
    }
}

impl Config {
    /// Returns a default `Config`
    pub fn new() -> Config {
        Config::default()
    }

    builder!(
        (automatic_save, get_automatic_save, set_automatic_save, bool, "whether a successful add may trigger a save of all spaces"),
        (save_interval, get_save_interval, set_save_interval, Duration, "minimum time between automatic saves of a space"),
        (global_file_name, get_global_file_name, set_global_file_name, PathBuf, "path used when saving all spaces without an explicit one")
    );

    /// Whether a space last saved at `last_save` is due for an automatic
    /// save at `now`.
    pub(crate) fn autosave_due(&self, last_save: Duration, now: Duration) -> bool {
        self.automatic_save
            && now.saturating_sub(last_save) >= self.save_interval
    }

    /// Create a new `ImgDb` in front of `engine` using this configuration.
    pub fn open<E: crate::Engine>(self, engine: E) -> ImgDb<E> {
        ImgDb::new(engine, self)
    }
}
