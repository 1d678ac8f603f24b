/*
 *  icons.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Weather condition categories and the icon fallback chain
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

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Icon family a page prefers; later families are the fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IconSource {
    #[default]
    Custom,
    Fontawesome,
    Emoji,
}

/// Groups of WMO weather codes that share an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherCategory {
    Clear,
    PartlyCloudy,
    Overcast,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Showers,
    SnowShowers,
    Thunderstorm,
    Unknown,
}

impl WeatherCategory {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 | 1 => WeatherCategory::Clear,
            2 => WeatherCategory::PartlyCloudy,
            3 => WeatherCategory::Overcast,
            45 | 48 => WeatherCategory::Fog,
            51..=57 => WeatherCategory::Drizzle,
            61..=67 => WeatherCategory::Rain,
            71..=77 => WeatherCategory::Snow,
            80..=82 => WeatherCategory::Showers,
            85 | 86 => WeatherCategory::SnowShowers,
            95..=99 => WeatherCategory::Thunderstorm,
            _ => WeatherCategory::Unknown,
        }
    }

    /// File stem used for custom icons.
    pub fn slug(&self) -> &'static str {
        match self {
            WeatherCategory::Clear => "clear",
            WeatherCategory::PartlyCloudy => "partly_cloudy",
            WeatherCategory::Overcast => "overcast",
            WeatherCategory::Fog => "fog",
            WeatherCategory::Drizzle => "drizzle",
            WeatherCategory::Rain => "rain",
            WeatherCategory::Snow => "snow",
            WeatherCategory::Showers => "showers",
            WeatherCategory::SnowShowers => "snow_showers",
            WeatherCategory::Thunderstorm => "thunderstorm",
            WeatherCategory::Unknown => "unknown",
        }
    }

    /// Text stand-in where neither bitmap nor glyph can be drawn.
    pub fn short_label(&self) -> &'static str {
        match self {
            WeatherCategory::Clear => "SUN",
            WeatherCategory::PartlyCloudy => "P.CLD",
            WeatherCategory::Overcast => "CLOUD",
            WeatherCategory::Fog => "FOG",
            WeatherCategory::Drizzle => "DRZL",
            WeatherCategory::Rain => "RAIN",
            WeatherCategory::Snow => "SNOW",
            WeatherCategory::Showers => "SHWR",
            WeatherCategory::SnowShowers => "S.SHW",
            WeatherCategory::Thunderstorm => "STORM",
            WeatherCategory::Unknown => "?",
        }
    }

    fn fontawesome_class(&self) -> Option<&'static str> {
        let class = match self {
            WeatherCategory::Clear => "fa-sun",
            WeatherCategory::PartlyCloudy => "fa-cloud-sun",
            WeatherCategory::Overcast => "fa-cloud",
            WeatherCategory::Fog => "fa-smog",
            WeatherCategory::Drizzle => "fa-cloud-rain",
            WeatherCategory::Rain => "fa-cloud-showers-heavy",
            WeatherCategory::Snow => "fa-snowflake",
            WeatherCategory::Showers => "fa-cloud-sun-rain",
            WeatherCategory::SnowShowers => "fa-snowflake",
            WeatherCategory::Thunderstorm => "fa-bolt",
            WeatherCategory::Unknown => return None,
        };
        Some(class)
    }

    fn emoji(&self) -> &'static str {
        match self {
            WeatherCategory::Clear => "☀️",
            WeatherCategory::PartlyCloudy => "⛅",
            WeatherCategory::Overcast => "☁️",
            WeatherCategory::Fog => "🌫️",
            WeatherCategory::Drizzle => "🌦️",
            WeatherCategory::Rain => "🌧️",
            WeatherCategory::Snow => "❄️",
            WeatherCategory::Showers => "🌦️",
            WeatherCategory::SnowShowers => "🌨️",
            WeatherCategory::Thunderstorm => "⛈️",
            WeatherCategory::Unknown => UNKNOWN_EMOJI,
        }
    }
}

pub const UNKNOWN_EMOJI: &str = "❓";

/// Something a renderer can draw for a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IconHandle {
    Custom { path: PathBuf },
    Fontawesome { class: &'static str },
    Emoji { glyph: &'static str },
}

type Resolver = fn(&IconResolver, u16, WeatherCategory) -> Option<IconHandle>;

/// Tried in order from the configured source, first hit wins.
const CHAIN: [(IconSource, Resolver); 3] = [
    (IconSource::Custom, IconResolver::custom_icon),
    (IconSource::Fontawesome, IconResolver::fontawesome_icon),
    (IconSource::Emoji, IconResolver::emoji_icon),
];

#[derive(Debug, Clone)]
pub struct IconResolver {
    custom_dir: PathBuf,
    fontawesome_css: Option<PathBuf>,
    preferred: IconSource,
}

impl IconResolver {
    pub fn new(custom_dir: PathBuf, preferred: IconSource) -> Self {
        Self { custom_dir, fontawesome_css: None, preferred }
    }

    /// Local FontAwesome stylesheet; without it the fontawesome source yields nothing.
    pub fn with_fontawesome_css(mut self, css: PathBuf) -> Self {
        self.fontawesome_css = Some(css);
        self
    }

    /// The stylesheet, when it is actually on disk.
    pub fn fontawesome_css(&self) -> Option<&Path> {
        self.fontawesome_css.as_deref().filter(|p| p.is_file())
    }

    /// Resolve using the configured source.
    pub fn resolve_preferred(&self, code: u16) -> IconHandle {
        self.resolve(code, self.preferred)
    }

    /// Resolve starting at `source`; never fails, emoji is terminal.
    pub fn resolve(&self, code: u16, source: IconSource) -> IconHandle {
        let category = WeatherCategory::from_code(code);
        let start = CHAIN.iter().position(|(s, _)| *s == source).unwrap_or(0);
        CHAIN[start..]
            .iter()
            .find_map(|(s, resolver)| {
                let handle = resolver(self, code, category);
                if handle.is_none() {
                    debug!("no {:?} icon for code {} ({:?}), falling through", s, code, category);
                }
                handle
            })
            .unwrap_or(IconHandle::Emoji { glyph: UNKNOWN_EMOJI })
    }

    /// `<code>.png` overrides `<category>.png`.
    fn custom_icon(&self, code: u16, category: WeatherCategory) -> Option<IconHandle> {
        [format!("{code}.png"), format!("{}.png", category.slug())]
            .into_iter()
            .map(|name| self.custom_dir.join(name))
            .find(|p| p.is_file())
            .map(|path| IconHandle::Custom { path })
    }

    fn fontawesome_icon(&self, _code: u16, category: WeatherCategory) -> Option<IconHandle> {
        self.fontawesome_css()?;
        category.fontawesome_class().map(|class| IconHandle::Fontawesome { class })
    }

    fn emoji_icon(&self, _code: u16, category: WeatherCategory) -> Option<IconHandle> {
        Some(IconHandle::Emoji { glyph: category.emoji() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("myimpression-icons-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_code_ranges() {
        assert_eq!(WeatherCategory::from_code(0), WeatherCategory::Clear);
        assert_eq!(WeatherCategory::from_code(2), WeatherCategory::PartlyCloudy);
        assert_eq!(WeatherCategory::from_code(48), WeatherCategory::Fog);
        assert_eq!(WeatherCategory::from_code(55), WeatherCategory::Drizzle);
        assert_eq!(WeatherCategory::from_code(65), WeatherCategory::Rain);
        assert_eq!(WeatherCategory::from_code(75), WeatherCategory::Snow);
        assert_eq!(WeatherCategory::from_code(81), WeatherCategory::Showers);
        assert_eq!(WeatherCategory::from_code(86), WeatherCategory::SnowShowers);
        assert_eq!(WeatherCategory::from_code(96), WeatherCategory::Thunderstorm);
        assert_eq!(WeatherCategory::from_code(4), WeatherCategory::Unknown);
        assert_eq!(WeatherCategory::from_code(1000), WeatherCategory::Unknown);
    }

    #[test]
    fn test_nothing_on_disk_falls_to_emoji() {
        let dir = scratch("empty");
        let r = IconResolver::new(dir.clone(), IconSource::Custom).with_fontawesome_css(dir.join("all.min.css"));
        assert_eq!(r.resolve(61, IconSource::Custom), IconHandle::Emoji { glyph: WeatherCategory::Rain.emoji() });
        assert_eq!(r.resolve(61, IconSource::Fontawesome), IconHandle::Emoji { glyph: WeatherCategory::Rain.emoji() });
        assert_eq!(r.fontawesome_css(), None);
    }

    #[test]
    fn test_custom_missing_falls_to_local_fontawesome() {
        let dir = scratch("fa");
        fs::write(dir.join("all.min.css"), b".fa-solid{}").unwrap();
        let r = IconResolver::new(dir.clone(), IconSource::Custom).with_fontawesome_css(dir.join("all.min.css"));
        assert_eq!(r.resolve(61, IconSource::Custom), IconHandle::Fontawesome { class: "fa-cloud-showers-heavy" });
        assert_eq!(r.fontawesome_css(), Some(dir.join("all.min.css").as_path()));
    }

    #[test]
    fn test_unknown_code_falls_to_emoji() {
        let r = IconResolver::new(scratch("unknown"), IconSource::Custom);
        assert_eq!(r.resolve(42, IconSource::Custom), IconHandle::Emoji { glyph: UNKNOWN_EMOJI });
        assert_eq!(r.resolve(42, IconSource::Fontawesome), IconHandle::Emoji { glyph: UNKNOWN_EMOJI });
    }

    #[test]
    fn test_custom_file_found() {
        let dir = scratch("custom");
        fs::write(dir.join("rain.png"), b"png").unwrap();
        fs::write(dir.join("63.png"), b"png").unwrap();
        let r = IconResolver::new(dir.clone(), IconSource::Custom);
        assert_eq!(r.resolve(61, IconSource::Custom), IconHandle::Custom { path: dir.join("rain.png") });
        assert_eq!(r.resolve(63, IconSource::Custom), IconHandle::Custom { path: dir.join("63.png") });
        // custom is never consulted when the chain starts later
        assert_eq!(r.resolve(61, IconSource::Emoji), IconHandle::Emoji { glyph: WeatherCategory::Rain.emoji() });
    }

    #[test]
    fn test_preferred_source() {
        let dir = scratch("pref");
        fs::write(dir.join("fa.css"), b"").unwrap();
        let r = IconResolver::new(dir.clone(), IconSource::Fontawesome).with_fontawesome_css(dir.join("fa.css"));
        assert_eq!(r.resolve_preferred(0), IconHandle::Fontawesome { class: "fa-sun" });
    }
}
