// Configuration management module
// Handles TOML process settings and their console rendering

pub mod display;
pub mod settings;


pub use display::{render_config, show_config};
pub use settings::{
    API_KEY_ENV, Config, ConfigError, EmbeddingConfig, RetrievalSettings, ServerConfig,
    StorageConfig,
};

/// Resolve the configuration directory, preferring an explicit override
#[inline]
pub fn get_config_dir(
    override_dir: Option<&std::path::Path>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::default_dir(),
    }
}
