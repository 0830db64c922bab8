use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use too::providers::configs::{Profile, ProviderId};

pub const ENV_PREFIX: &str = "TOO";

/// `~/.config/too/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("too").join("config.toml"))
}

/// Load the profile from the config file, layered with `TOO_` environment variables
///
/// A missing file is an empty profile. Nested keys use `__`, so the openai key is
/// `TOO_PROVIDERS__OPENAI__API_KEY`.
pub fn load_profile(path: Option<&Path>) -> Result<Profile> {
    let mut builder = Config::builder();
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    if let Some(path) = &path {
        tracing::debug!(path = %path.display(), "loading configuration");
        builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml).required(false));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration")?;

    config
        .try_deserialize()
        .context("Invalid configuration profile")
}

/// Apply command line overrides on top of the loaded profile
pub fn apply_overrides(profile: &mut Profile, provider: Option<ProviderId>, model: Option<String>) {
    if let Some(provider) = provider {
        profile.provider = provider;
    }
    if let Some(model) = model {
        profile
            .providers
            .entry(profile.provider)
            .or_default()
            .model = Some(model);
    }
}
