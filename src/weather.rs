/*
 *  weather.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Open-Meteo forecast pipeline on top of the data cache
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

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;

use crate::cache::DataCache;
use crate::config::{Units, WeatherConfig};
use crate::geoloc::{self, NOMINATIM_URL};
use crate::http::{FetchError, HttpClient};

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub const DAILY_SLOTS: usize = 5;
pub const HOURLY_SLOTS: usize = 12;

const CURRENT_FIELDS: &str = "temperature_2m,weather_code,apparent_temperature,wind_speed_10m,\
                              relative_humidity_2m,surface_pressure,visibility,uv_index";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,sunrise,sunset,uv_index_max";
const HOURLY_FIELDS: &str = "temperature_2m,weather_code";

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] FetchError),
    #[error("weather payload malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("weather payload incomplete: {0}")]
    MissingData(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub time: Option<NaiveDateTime>,
    pub temperature: f64,
    pub condition_code: u16,
    pub feels_like: Option<f64>,
    pub wind_speed: f64,
    pub humidity: f64,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub uv_index: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub condition_code: u16,
    pub high: f64,
    pub low: f64,
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
    pub uv_index_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: NaiveDateTime,
    pub condition_code: u16,
    pub temperature: f64,
}

/// Renderable forecast. Built fresh from every payload, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: String,
    pub units: Units,
    pub fetched_at: DateTime<Utc>,
    pub current: CurrentConditions,
    pub daily: Vec<DailyForecast>,
    pub hourly: Vec<HourlyForecast>,
}

/// What the pipeline hands to the weather modes.
#[derive(Debug, Clone)]
pub enum WeatherState {
    Fresh(Arc<WeatherSnapshot>),
    Stale(Arc<WeatherSnapshot>),
    Unavailable(String),
}

impl WeatherState {
    pub fn snapshot(&self) -> Option<&Arc<WeatherSnapshot>> {
        match self {
            WeatherState::Fresh(s) | WeatherState::Stale(s) => Some(s),
            WeatherState::Unavailable(_) => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, WeatherState::Stale(_))
    }
}

/// WMO weather interpretation codes as used by Open-Meteo.
pub fn condition_description(code: u16) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

// Open-Meteo wire format; series values can be null

#[derive(Debug, Deserialize)]
struct RawForecast {
    current: Option<RawCurrent>,
    daily: Option<RawDaily>,
    hourly: Option<RawHourly>,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    time: Option<String>,
    temperature_2m: Option<f64>,
    weather_code: Option<u16>,
    apparent_temperature: Option<f64>,
    wind_speed_10m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    surface_pressure: Option<f64>,
    visibility: Option<f64>,
    uv_index: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDaily {
    time: Vec<String>,
    weather_code: Vec<Option<u16>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    sunrise: Vec<Option<String>>,
    sunset: Vec<Option<String>>,
    uv_index_max: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    weather_code: Vec<Option<u16>>,
}

fn parse_local(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

fn at<T: Copy>(series: &[Option<T>], i: usize) -> Option<T> {
    series.get(i).copied().flatten()
}

fn require<T>(value: Option<T>, what: &str) -> Result<T, WeatherError> {
    value.ok_or_else(|| WeatherError::MissingData(what.to_string()))
}

/// Build a snapshot from a raw Open-Meteo response.
///
/// The current block is mandatory. Series stop at the first slot with a missing
/// value and are cut to 5 days and 12 hours; short series stay short.
pub fn parse_forecast(
    raw: &Value,
    location: &str,
    units: Units,
    fetched_at: DateTime<Utc>,
) -> Result<WeatherSnapshot, WeatherError> {
    let raw = RawForecast::deserialize(raw)?;
    let cur = require(raw.current, "current")?;
    let daily = require(raw.daily, "daily")?;
    let hourly = require(raw.hourly, "hourly")?;

    let current = CurrentConditions {
        time: cur.time.as_deref().and_then(parse_local),
        temperature: require(cur.temperature_2m, "current.temperature_2m")?,
        condition_code: require(cur.weather_code, "current.weather_code")?,
        feels_like: cur.apparent_temperature,
        wind_speed: require(cur.wind_speed_10m, "current.wind_speed_10m")?,
        humidity: require(cur.relative_humidity_2m, "current.relative_humidity_2m")?,
        pressure: cur.surface_pressure,
        visibility: cur.visibility,
        uv_index: cur.uv_index,
    };

    let mut days = Vec::with_capacity(DAILY_SLOTS);
    for (i, date) in daily.time.iter().enumerate().take(DAILY_SLOTS) {
        let (Ok(date), Some(code), Some(high), Some(low)) = (
            NaiveDate::parse_from_str(date, "%Y-%m-%d"),
            at(&daily.weather_code, i),
            at(&daily.temperature_2m_max, i),
            at(&daily.temperature_2m_min, i),
        ) else {
            break;
        };
        days.push(DailyForecast {
            date,
            condition_code: code,
            high,
            low,
            sunrise: daily.sunrise.get(i).cloned().flatten().as_deref().and_then(parse_local),
            sunset: daily.sunset.get(i).cloned().flatten().as_deref().and_then(parse_local),
            uv_index_max: at(&daily.uv_index_max, i),
        });
    }

    // the hourly strip starts at the observation's hour
    let start_hour = current.time.and_then(|t| t.with_minute(0)).and_then(|t| t.with_second(0));
    let mut hours = Vec::with_capacity(HOURLY_SLOTS);
    for (i, time) in hourly.time.iter().enumerate() {
        let Some(time) = parse_local(time) else {
            break;
        };
        if start_hour.is_some_and(|start| time < start) {
            continue;
        }
        let (Some(code), Some(temperature)) = (at(&hourly.weather_code, i), at(&hourly.temperature_2m, i)) else {
            break;
        };
        hours.push(HourlyForecast { time, condition_code: code, temperature });
        if hours.len() == HOURLY_SLOTS {
            break;
        }
    }

    Ok(WeatherSnapshot {
        location: location.to_string(),
        units,
        fetched_at,
        current,
        daily: days,
        hourly: hours,
    })
}

/// Forecast source for the weather modes.
pub struct WeatherPipeline {
    config: WeatherConfig,
    http: HttpClient,
    cache: Arc<DataCache>,
    forecast_url: String,
    geocode_url: String,
    location: OnceCell<String>,
}

impl WeatherPipeline {
    pub fn new(config: WeatherConfig, http: HttpClient, cache: Arc<DataCache>) -> Self {
        Self {
            config,
            http,
            cache,
            forecast_url: OPEN_METEO_URL.to_string(),
            geocode_url: NOMINATIM_URL.to_string(),
            location: OnceCell::new(),
        }
    }

    /// Point the pipeline at other endpoints (mirrors, tests).
    pub fn with_base_url(mut self, forecast_url: &str, geocode_url: &str) -> Self {
        self.forecast_url = forecast_url.to_string();
        self.geocode_url = geocode_url.to_string();
        self
    }

    pub fn config(&self) -> &WeatherConfig {
        &self.config
    }

    pub fn cache_key(&self) -> String {
        let units = match self.config.units {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        };
        format!("weather:{:.4},{:.4}:{}", self.config.latitude, self.config.longitude, units)
    }

    /// Configured name, else reverse geocoded. Only a resolved name is kept;
    /// after a failed lookup the coordinates are shown and the next call tries again.
    pub async fn location_label(&self) -> String {
        if let Some(name) = self.config.location_name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        let (latitude, longitude) = (self.config.latitude, self.config.longitude);
        let resolved = self
            .location
            .get_or_try_init(|| async {
                geoloc::reverse_geocode(&self.http, &self.cache, &self.geocode_url, latitude, longitude)
                    .await
                    .ok_or(())
            })
            .await;
        match resolved {
            Ok(name) => name.clone(),
            Err(()) => geoloc::format_coordinates(latitude, longitude),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("latitude", self.config.latitude.to_string()),
            ("longitude", self.config.longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("forecast_days", DAILY_SLOTS.to_string()),
            ("timezone", "auto".to_string()),
        ];
        if self.config.units == Units::Imperial {
            params.push(("temperature_unit", "fahrenheit".to_string()));
            params.push(("wind_speed_unit", "mph".to_string()));
        }
        params
    }

    /// Fresh, stale or unavailable; never an error.
    pub async fn get_snapshot(&self) -> WeatherState {
        let key = self.cache_key();
        let units = self.config.units;
        let params = self.query();
        let http = &self.http;
        let url = self.forecast_url.as_str();

        let fetched = self
            .cache
            .get_or_refresh(&key, self.config.cache_duration(), self.config.update_interval(), || async move {
                info!("Fetching weather data from {}", url);
                let raw: Value = http.get_json(url, &params).await?;
                // reject partial payloads before they reach the cache
                parse_forecast(&raw, "", units, Utc::now())?;
                Ok::<Value, anyhow::Error>(raw)
            })
            .await;

        let fetched = match fetched {
            Ok(f) => f,
            Err(e) => {
                error!("Weather unavailable: {}", e);
                return WeatherState::Unavailable(e.to_string());
            }
        };

        let location = self.location_label().await;
        match parse_forecast(&fetched.payload, &location, units, fetched.fetched_at) {
            Ok(snapshot) if fetched.is_stale => {
                warn!("Showing stale weather from {}", fetched.fetched_at);
                WeatherState::Stale(Arc::new(snapshot))
            }
            Ok(snapshot) => WeatherState::Fresh(Arc::new(snapshot)),
            Err(e) => {
                error!("Cached weather payload unusable: {}", e);
                WeatherState::Unavailable(e.to_string())
            }
        }
    }
}

/// Background refresh task publishing every poll on a watch channel.
pub struct RefreshHandle {
    rx: watch::Receiver<WeatherState>,
    stop_sender: mpsc::Sender<()>,
    poll_handle: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn subscribe(&self) -> watch::Receiver<WeatherState> {
        self.rx.clone()
    }

    pub async fn stop(self) {
        if let Err(e) = self.stop_sender.send(()).await {
            error!("Failed to send stop signal to weather refresh task: {}", e);
        }
        if let Err(e) = self.poll_handle.await {
            error!("Weather refresh task failed to join: {}", e);
        }
        info!("Weather refresh stopped.");
    }
}

/// Polls immediately, then every `update_interval`.
pub fn spawn_refresh(pipeline: Arc<WeatherPipeline>) -> RefreshHandle {
    let (tx, rx) = watch::channel(WeatherState::Unavailable("weather not fetched yet".to_string()));
    let (stop_sender, mut stop_rx) = mpsc::channel(1);
    let interval = pipeline.config().update_interval();

    let poll_handle = tokio::spawn(async move {
        loop {
            let state = pipeline.get_snapshot().await;
            match &state {
                WeatherState::Fresh(_) => info!("Weather polling successful."),
                WeatherState::Stale(_) => warn!("Weather polling fell back to cached data."),
                WeatherState::Unavailable(why) => error!("Weather polling failed: {}", why),
            }
            if tx.send(state).is_err() {
                info!("No weather subscribers left, refresh exiting.");
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.recv() => {
                    info!("Weather refresh task received stop signal. Exiting.");
                    break;
                }
            }
        }
    });

    RefreshHandle { rx, stop_sender, poll_handle }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use serde_json::json;

    /// A trimmed Open-Meteo response for 2026-03-02 12:15 local time.
    pub fn sample_forecast_json() -> Value {
        let hours: Vec<String> = (0..24).map(|h| format!("2026-03-02T{h:02}:00")).collect();
        let temps: Vec<f64> = (0..24).map(|h| 4.0 + h as f64 * 0.5).collect();
        let codes: Vec<u16> = (0..24).map(|h| if h < 15 { 3 } else { 61 }).collect();
        json!({
            "latitude": 51.5,
            "longitude": -0.12,
            "current": {
                "time": "2026-03-02T12:15",
                "temperature_2m": 9.6,
                "weather_code": 2,
                "apparent_temperature": 7.1,
                "wind_speed_10m": 14.8,
                "relative_humidity_2m": 71,
                "surface_pressure": 1012.4,
                "visibility": 24140.0,
                "uv_index": 1.35
            },
            "daily": {
                "time": ["2026-03-02", "2026-03-03", "2026-03-04", "2026-03-05", "2026-03-06"],
                "weather_code": [2, 61, 63, 3, 0],
                "temperature_2m_max": [11.0, 10.2, 8.9, 9.5, 12.1],
                "temperature_2m_min": [3.1, 5.0, 4.4, 2.2, 1.9],
                "sunrise": ["2026-03-02T06:39", "2026-03-03T06:37", "2026-03-04T06:35", "2026-03-05T06:32", "2026-03-06T06:30"],
                "sunset": ["2026-03-02T17:47", "2026-03-03T17:49", "2026-03-04T17:51", "2026-03-05T17:52", "2026-03-06T17:54"],
                "uv_index_max": [2.1, 1.4, 1.2, 2.3, 2.6]
            },
            "hourly": {
                "time": hours,
                "temperature_2m": temps,
                "weather_code": codes
            }
        })
    }

    pub fn sample_snapshot() -> WeatherSnapshot {
        let fetched_at = DateTime::parse_from_rfc3339("2026-03-02T12:20:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap();
        parse_forecast(&sample_forecast_json(), "London, England", Units::Metric, fetched_at).unwrap()
    }
}
