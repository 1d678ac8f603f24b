/*
 *  geoloc.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Reverse geocoding of the configured coordinates
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

use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

use crate::cache::DataCache;
use crate::http::HttpClient;

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Place names barely move, a month is plenty.
pub const LOCATION_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Default, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    hamlet: Option<String>,
    municipality: Option<String>,
    suburb: Option<String>,
    state: Option<String>,
    province: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

impl Address {
    fn label(self) -> Option<String> {
        let place = self.city.or(self.town).or(self.village).or(self.hamlet).or(self.municipality).or(self.suburb);
        let region = self.state.or(self.province).or(self.county);
        match (place, region, self.country) {
            (Some(p), Some(r), Some(c)) if r != p => Some(format!("{p}, {r}, {c}")),
            (Some(p), _, Some(c)) => Some(format!("{p}, {c}")),
            (Some(p), _, None) => Some(p),
            (None, _, Some(c)) => Some(c),
            (None, _, None) => None,
        }
    }
}

/// `51.51°N, 0.13°W`
pub fn format_coordinates(latitude: f64, longitude: f64) -> String {
    let ns = if latitude >= 0.0 { 'N' } else { 'S' };
    let ew = if longitude >= 0.0 { 'E' } else { 'W' };
    format!("{:.2}°{}, {:.2}°{}", latitude.abs(), ns, longitude.abs(), ew)
}

pub fn cache_key(latitude: f64, longitude: f64) -> String {
    format!("location:{latitude:.4},{longitude:.4}")
}

/// Human readable place for the coordinates, `None` when the lookup fails.
pub async fn reverse_geocode(
    http: &HttpClient,
    cache: &DataCache,
    base_url: &str,
    latitude: f64,
    longitude: f64,
) -> Option<String> {
    let key = cache_key(latitude, longitude);
    let fetched = cache
        .get_or_fetch(&key, LOCATION_TTL, || async move {
            let params = [
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
                ("accept-language", "en".to_string()),
            ];
            let resp: ReverseResponse = http.get_json(base_url, &params).await?;
            let label = resp
                .address
                .label()
                .ok_or_else(|| anyhow::anyhow!("no usable address for {latitude},{longitude}"))?;
            Ok::<_, anyhow::Error>(serde_json::Value::String(label))
        })
        .await;

    match fetched {
        Ok(f) => {
            let label = f.payload.as_str().map(str::to_string);
            if let Some(label) = &label {
                info!("Location resolved: {}", label);
            }
            label
        }
        Err(e) => {
            warn!("Reverse geocoding failed: {}", e);
            None
        }
    }
}
