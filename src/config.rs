//! Settings resolution: command-line overrides, then the TOML config file,
//! then built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::merge::DEFAULT_AUDIO_CODEC;
use crate::progress::ProgressDraw;
use crate::select::FormatFilter;

pub const DEFAULT_MERGE_TOOL: &str = "ffmpeg";
pub const DEFAULT_PROVIDER_TOOL: &str = "yt-dlp";
pub const CONFIG_DIR_NAME: &str = "ytd";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// On-disk configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub merge_tool: Option<String>,
    pub provider_tool: Option<String>,
    pub audio_codec: Option<String>,
    pub quality: Option<String>,
    pub mime_type: Option<String>,
    pub language: Option<String>,
}

/// Values supplied on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub output_name: Option<String>,
    pub quality: Option<String>,
    pub mime_type: Option<String>,
    pub language: Option<String>,
    pub overwrite: bool,
    pub quiet: bool,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Explicit output file name; derived from the title when unset.
    pub output_name: Option<String>,
    pub merge_tool: String,
    pub provider_tool: String,
    pub audio_codec: String,
    pub overwrite: bool,
    pub video_filter: FormatFilter,
    pub audio_filter: FormatFilter,
    pub progress: ProgressDraw,
}

/// `$XDG_CONFIG_HOME/ytd/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Parses the config file, or `Ok(None)` when it does not exist.
pub fn read_config_file(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let parsed = toml::from_str(&content)
        .map_err(|err| Error::Config(format!("parsing {}: {err}", path.display())))?;
    Ok(Some(parsed))
}

fn expand_home(path: PathBuf, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl Settings {
    pub fn resolve(overrides: Overrides, file: Option<FileConfig>, home: &Path) -> Self {
        let file = file.unwrap_or_default();

        let output_dir = overrides
            .output_dir
            .or(file.output_dir)
            .map(|dir| expand_home(dir, home))
            .unwrap_or_else(|| home.join("Downloads"));
        let temp_dir = overrides
            .temp_dir
            .or(file.temp_dir)
            .map(|dir| expand_home(dir, home))
            .unwrap_or_else(|| home.join(".ytd").join("tmp"));

        let mime_type = non_blank(overrides.mime_type.or(file.mime_type));
        let video_filter = FormatFilter {
            quality: non_blank(overrides.quality.or(file.quality)),
            mime_type: mime_type.clone(),
            ..FormatFilter::video_only()
        };
        let audio_filter = FormatFilter {
            mime_type,
            language: non_blank(overrides.language.or(file.language)),
            ..FormatFilter::default()
        };

        Self {
            output_dir,
            temp_dir,
            output_name: non_blank(overrides.output_name),
            merge_tool: non_blank(file.merge_tool).unwrap_or_else(|| DEFAULT_MERGE_TOOL.to_owned()),
            provider_tool: non_blank(file.provider_tool)
                .unwrap_or_else(|| DEFAULT_PROVIDER_TOOL.to_owned()),
            audio_codec: non_blank(file.audio_codec).unwrap_or_else(|| DEFAULT_AUDIO_CODEC.to_owned()),
            overwrite: overrides.overwrite,
            video_filter,
            audio_filter,
            progress: if overrides.quiet {
                ProgressDraw::Hidden
            } else {
                ProgressDraw::Terminal
            },
        }
    }
}

/// Reads the config file named by `--config` (or the default location) and
/// merges it with `overrides`.
pub fn load_settings(overrides: Overrides) -> Result<Settings> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("could not determine the home directory".into()))?;

    let file = match overrides.config.clone().or_else(default_config_path) {
        Some(path) => {
            let file = read_config_file(&path)?;
            debug!(path = %path.display(), found = file.is_some(), "config file");
            file
        }
        None => None,
    };
    Ok(Settings::resolve(overrides, file, &home))
}
