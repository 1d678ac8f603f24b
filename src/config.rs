/*
 *  config.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  YAML configuration, CLI overrides and validation
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::buttons::ButtonId;
use crate::display::color::BackgroundColor;
use crate::display::compositor::FitOptions;
use crate::icons::IconSource;
use crate::modes::ModeKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top level document. Every section falls back to its defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub runtime: RuntimeConfig,
    pub display: DisplayConfig,
    pub buttons: BTreeMap<ButtonId, ModeKind>,
    pub photo_cycle: PhotoCycleConfig,
    pub tumblr_rss: TumblrConfig,
    pub deviantart_rss: DeviantArtConfig,
    pub weather: WeatherConfig,
    pub weather_html: WeatherHtmlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            runtime: RuntimeConfig::default(),
            display: DisplayConfig::default(),
            buttons: default_buttons(),
            photo_cycle: PhotoCycleConfig::default(),
            tumblr_rss: TumblrConfig::default(),
            deviantart_rss: DeviantArtConfig::default(),
            weather: WeatherConfig::default(),
            weather_html: WeatherHtmlConfig::default(),
        }
    }
}

fn default_buttons() -> BTreeMap<ButtonId, ModeKind> {
    BTreeMap::from([
        (ButtonId::A, ModeKind::PhotoCycle),
        (ButtonId::B, ModeKind::TumblrRss),
        (ButtonId::C, ModeKind::Weather),
        (ButtonId::D, ModeKind::WeatherHtml),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub http_retries: u8,
    pub debounce_ms: u64,
    pub tick_ms: u64,
    pub start_mode: ModeKind,
    /// where the file sink writes the rendered frame
    pub output: PathBuf,
    pub led: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            http_timeout_secs: 10,
            http_retries: 3,
            debounce_ms: 500,
            tick_ms: 100,
            start_mode: ModeKind::PhotoCycle,
            output: PathBuf::from("data/frame.png"),
            led: true,
        }
    }
}

impl RuntimeConfig {
    pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs) }
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
    pub fn tick(&self) -> Duration { Duration::from_millis(self.tick_ms) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub resolution: [u32; 2],
    pub dpi: u32,
    pub colors: u8,
    pub refresh_rate: u32,
    /// Floyd-Steinberg dither the preview written by the file sink
    pub dither: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { resolution: [800, 480], dpi: 127, colors: 6, refresh_rate: 30, dither: true }
    }
}

impl DisplayConfig {
    pub fn width(&self) -> u32 { self.resolution[0] }
    pub fn height(&self) -> u32 { self.resolution[1] }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoCycleConfig {
    pub folder: PathBuf,
    pub display_time: u64,
    pub random_order: bool,
    pub supported_formats: Vec<String>,
    pub background_color: BackgroundColor,
    pub saturation: f32,
    pub fill_screen: bool,
    pub auto_rotate: bool,
    pub persist_cursor: bool,
}

impl Default for PhotoCycleConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("data/photos"),
            display_time: 10,
            random_order: false,
            supported_formats: ["jpg", "jpeg", "png", "webp", "bmp"].iter().map(|s| s.to_string()).collect(),
            background_color: BackgroundColor::Rgb([255, 255, 255]),
            saturation: 0.5,
            fill_screen: false,
            auto_rotate: true,
            persist_cursor: false,
        }
    }
}

impl PhotoCycleConfig {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            fill_screen: self.fill_screen,
            auto_rotate: self.auto_rotate,
            saturation: self.saturation,
            background: self.background_color,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TumblrConfig {
    pub rss_url: String,
    pub display_time: u64,
    pub max_posts: usize,
    pub update_interval: u64,
    pub background_color: BackgroundColor,
    pub saturation: f32,
    pub fill_screen: bool,
    pub auto_rotate: bool,
    pub persist_cursor: bool,
}

impl Default for TumblrConfig {
    fn default() -> Self {
        Self {
            rss_url: "https://handsoffmydinosaur.tumblr.com/rss".to_string(),
            display_time: 300,
            max_posts: 300,
            update_interval: 86400,
            background_color: BackgroundColor::Auto,
            saturation: 1.0,
            fill_screen: false,
            auto_rotate: true,
            persist_cursor: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviantArtConfig {
    pub username: Option<String>,
    pub rss_url: Option<String>,
    pub display_time: u64,
    pub max_posts: usize,
    pub update_interval: u64,
    pub background_color: BackgroundColor,
    pub saturation: f32,
    pub fill_screen: bool,
    pub auto_rotate: bool,
    pub persist_cursor: bool,
}

impl Default for DeviantArtConfig {
    fn default() -> Self {
        Self {
            username: Some("WestOz64".to_string()),
            rss_url: None,
            display_time: 15,
            max_posts: 20,
            update_interval: 3600,
            background_color: BackgroundColor::Auto,
            saturation: 1.0,
            fill_screen: false,
            auto_rotate: true,
            persist_cursor: false,
        }
    }
}

impl DeviantArtConfig {
    /// Explicit feed URL wins, otherwise the gallery feed for `username`.
    pub fn feed_url(&self) -> Option<String> {
        if let Some(url) = self.rss_url.as_ref().filter(|u| !u.trim().is_empty()) {
            return Some(url.clone());
        }
        self.username
            .as_ref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| format!("https://backend.deviantart.com/rss.xml?q=gallery:{}", u.trim()))
    }
}

/// Feed settings shared by the RSS gallery modes.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,
    pub display_time: Duration,
    pub max_posts: usize,
    pub update_interval: Duration,
    pub fit: FitOptions,
    pub persist_cursor: bool,
}

impl From<&TumblrConfig> for FeedSettings {
    fn from(c: &TumblrConfig) -> Self {
        Self {
            url: c.rss_url.clone(),
            display_time: Duration::from_secs(c.display_time),
            max_posts: c.max_posts,
            update_interval: Duration::from_secs(c.update_interval),
            fit: FitOptions {
                fill_screen: c.fill_screen,
                auto_rotate: c.auto_rotate,
                saturation: c.saturation,
                background: c.background_color,
            },
            persist_cursor: c.persist_cursor,
        }
    }
}

impl From<&DeviantArtConfig> for FeedSettings {
    fn from(c: &DeviantArtConfig) -> Self {
        Self {
            url: c.feed_url().unwrap_or_default(),
            display_time: Duration::from_secs(c.display_time),
            max_posts: c.max_posts,
            update_interval: Duration::from_secs(c.update_interval),
            fit: FitOptions {
                fill_screen: c.fill_screen,
                auto_rotate: c.auto_rotate,
                saturation: c.saturation,
                background: c.background_color,
            },
            persist_cursor: c.persist_cursor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn temperature_suffix(&self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }

    pub fn wind_suffix(&self) -> &'static str {
        match self {
            Units::Metric => "km/h",
            Units::Imperial => "mph",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// skips reverse geocoding when set
    pub location_name: Option<String>,
    /// seconds between refetch attempts
    pub update_interval: u64,
    /// seconds a fetched payload counts as fresh
    pub cache_duration: u64,
    pub display_time: u64,
    pub units: Units,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            latitude: 51.5074,
            longitude: -0.1278,
            location_name: None,
            update_interval: 1800,
            cache_duration: 3600,
            display_time: 300,
            units: Units::Metric,
        }
    }
}

impl WeatherConfig {
    pub fn update_interval(&self) -> Duration { Duration::from_secs(self.update_interval) }
    pub fn cache_duration(&self) -> Duration { Duration::from_secs(self.cache_duration) }
    pub fn display_time(&self) -> Duration { Duration::from_secs(self.display_time) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherHtmlConfig {
    pub icon_source: IconSource,
    pub custom_icon_path: PathBuf,
    /// local FontAwesome stylesheet, fontawesome icons are skipped when missing
    pub fontawesome_css: PathBuf,
    pub template_dir: PathBuf,
    /// headless browser used for screenshots
    pub browser: String,
    pub render_timeout_secs: u64,
    pub display_time: u64,
    pub saturation: f32,
}

impl Default for WeatherHtmlConfig {
    fn default() -> Self {
        Self {
            icon_source: IconSource::Custom,
            custom_icon_path: PathBuf::from("assets/icons/weather"),
            fontawesome_css: PathBuf::from("assets/fontawesome/css/all.min.css"),
            template_dir: PathBuf::from("templates"),
            browser: "chromium-browser".to_string(),
            render_timeout_secs: 30,
            display_time: 300,
            saturation: 1.0,
        }
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "myimpression", about = "Multi-mode e-ink picture frame", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML/JSON config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// mode entered at startup, e.g. photo_cycle
    #[arg(long, value_parser = parse_mode)]
    pub start_mode: Option<ModeKind>,
    /// file the rendered frame is written to
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub cache_dir: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

fn parse_mode(s: &str) -> Result<ModeKind, String> {
    ModeKind::from_name(s).ok_or_else(|| format!("unknown mode '{s}'"))
}

/// Public entry point: parse CLI, read YAML, apply overrides, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Same as [`load`] for an already parsed command line.
pub fn load_with(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults, or the YAML file (explicit path or search)
    let mut cfg = if let Some(p) = cli.config.as_ref() {
        if !p.exists() {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
        read_yaml(p)?
    } else if let Some(p) = find_config_file() {
        log::info!("Using config file {}", p.display());
        read_yaml(&p)?
    } else {
        Config::default()
    };

    // 2) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 3) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Parse and validate a config document held in memory.
pub fn from_yaml_str(s: &str) -> Result<Config, ConfigError> {
    let cfg: Config = if s.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(s)?
    };
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/myimpression/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/myimpression/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/myimpression.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["config.yaml", "config.json", "config/myimpression.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()       { cfg.log_level = cli.log_level.clone(); }
    if let Some(mode) = cli.start_mode { cfg.runtime.start_mode = mode; }
    if let Some(p) = cli.output.as_ref()    { cfg.runtime.output = p.clone(); }
    if let Some(p) = cli.cache_dir.as_ref() { cfg.runtime.cache_dir = p.clone(); }
}

fn check_saturation(section: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{section}.saturation must be within 0.0..=1.0 (got {value})"
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{name} must be > 0")));
    }
    Ok(())
}

/// Put any invariants here (required fields, ranges, etc.)
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.display.width() == 0 || cfg.display.height() == 0 {
        return Err(ConfigError::Validation("display resolution must be > 0".into()));
    }
    check_positive("runtime.debounce_ms", cfg.runtime.debounce_ms)?;
    check_positive("runtime.tick_ms", cfg.runtime.tick_ms)?;
    check_positive("runtime.http_timeout_secs", cfg.runtime.http_timeout_secs)?;

    check_saturation("photo_cycle", cfg.photo_cycle.saturation)?;
    check_positive("photo_cycle.display_time", cfg.photo_cycle.display_time)?;
    if cfg.photo_cycle.supported_formats.is_empty() {
        return Err(ConfigError::Validation("photo_cycle.supported_formats is empty".into()));
    }

    check_saturation("tumblr_rss", cfg.tumblr_rss.saturation)?;
    check_positive("tumblr_rss.display_time", cfg.tumblr_rss.display_time)?;
    check_positive("tumblr_rss.update_interval", cfg.tumblr_rss.update_interval)?;

    check_saturation("deviantart_rss", cfg.deviantart_rss.saturation)?;
    check_positive("deviantart_rss.display_time", cfg.deviantart_rss.display_time)?;
    check_positive("deviantart_rss.update_interval", cfg.deviantart_rss.update_interval)?;
    if cfg.deviantart_rss.feed_url().is_none() {
        return Err(ConfigError::Validation(
            "deviantart_rss needs a username or an rss_url".into(),
        ));
    }

    let w = &cfg.weather;
    if !(-90.0..=90.0).contains(&w.latitude) || !(-180.0..=180.0).contains(&w.longitude) {
        return Err(ConfigError::Validation(format!(
            "weather coordinates out of range ({}, {})",
            w.latitude, w.longitude
        )));
    }
    check_positive("weather.update_interval", w.update_interval)?;
    check_positive("weather.cache_duration", w.cache_duration)?;
    check_positive("weather.display_time", w.display_time)?;
    if w.update_interval > w.cache_duration {
        return Err(ConfigError::Validation(format!(
            "weather.update_interval ({}s) must not exceed weather.cache_duration ({}s)",
            w.update_interval, w.cache_duration
        )));
    }

    check_saturation("weather_html", cfg.weather_html.saturation)?;
    check_positive("weather_html.display_time", cfg.weather_html.display_time)?;
    check_positive("weather_html.render_timeout_secs", cfg.weather_html.render_timeout_secs)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = Config::default();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.display.resolution, [800, 480]);
        assert_eq!(cfg.buttons.get(&ButtonId::A), Some(&ModeKind::PhotoCycle));
        assert_eq!(cfg.weather.cache_duration, 3600);
    }

    #[test]
    fn test_missing_keys_fall_back() {
        let cfg = from_yaml_str("weather:\n  latitude: 40.7128\n  longitude: -74.006\n").unwrap();
        assert_eq!(cfg.weather.latitude, 40.7128);
        assert_eq!(cfg.weather.update_interval, 1800);
        assert_eq!(cfg.photo_cycle.display_time, 10);
        assert_eq!(cfg.tumblr_rss.background_color, BackgroundColor::Auto);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let cfg = from_yaml_str("display:\n  resolution: [800, 480]\n  panel_vendor: inky\nnews_feed:\n  x: 1\n");
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_update_interval_exceeding_cache_duration_rejected() {
        let err = from_yaml_str("weather:\n  update_interval: 7200\n  cache_duration: 3600\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_buttons_and_colors() {
        let yaml = "buttons:\n  A: weather\n  B: deviantart_rss\nphoto_cycle:\n  background_color: [10, 20, 30]\ntumblr_rss:\n  background_color: light_gray\n";
        let cfg = from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.buttons.get(&ButtonId::A), Some(&ModeKind::Weather));
        assert_eq!(cfg.buttons.get(&ButtonId::B), Some(&ModeKind::DeviantArtRss));
        assert_eq!(cfg.photo_cycle.background_color, BackgroundColor::Rgb([10, 20, 30]));
        assert_eq!(cfg.tumblr_rss.background_color, BackgroundColor::Rgb([192, 192, 192]));
    }

    #[test]
    fn test_unknown_mode_is_error() {
        assert!(matches!(from_yaml_str("buttons:\n  A: solitaire\n"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_bad_saturation_and_coordinates() {
        assert!(from_yaml_str("photo_cycle:\n  saturation: 1.5\n").is_err());
        assert!(from_yaml_str("weather:\n  latitude: 100.0\n").is_err());
    }

    #[test]
    fn test_json_document_loads() {
        let cfg = from_yaml_str(r#"{"weather": {"latitude": 48.85, "longitude": 2.35}, "weather_html": {"icon_source": "emoji"}}"#).unwrap();
        assert_eq!(cfg.weather.longitude, 2.35);
        assert_eq!(cfg.weather_html.icon_source, IconSource::Emoji);
    }

    #[test]
    fn test_deviantart_feed_url() {
        let mut da = DeviantArtConfig::default();
        assert_eq!(
            da.feed_url().as_deref(),
            Some("https://backend.deviantart.com/rss.xml?q=gallery:WestOz64")
        );
        da.rss_url = Some("https://example.com/feed.xml".into());
        assert_eq!(da.feed_url().as_deref(), Some("https://example.com/feed.xml"));
        da.rss_url = None;
        da.username = None;
        assert!(da.feed_url().is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/myimpression.yaml")),
            ..Cli::default()
        };
        assert!(matches!(load_with(&cli), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        let cli = Cli {
            log_level: Some("debug".into()),
            start_mode: Some(ModeKind::Weather),
            ..Cli::default()
        };
        apply_cli_overrides(&mut cfg, &cli);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.runtime.start_mode, ModeKind::Weather);
    }
}
