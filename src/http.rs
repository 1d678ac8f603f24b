/*
 *  http.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Shared HTTP client with bounded timeouts and retries
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

use flate2::read::GzDecoder;
use log::{debug, warn};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

pub const USER_AGENT: &str = concat!("MyImpression ", env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("gzip decode error: {0}")]
    Decode(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cheap to clone; every clone shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retries: u8,
}

impl HttpClient {
    pub fn new(timeout: Duration, retries: u8) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(USER_AGENT));
        headers.insert("Accept-Encoding", header::HeaderValue::from_static("gzip"));
        headers.insert("Connection", header::HeaderValue::from_static("close"));

        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, retries: retries.max(1) })
    }

    /// GET with retries. Transport errors and 5xx are retried, 4xx is final.
    pub async fn get_bytes<T: Serialize + ?Sized>(&self, url: &str, params: &T) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.client.get(url).query(params).send().await;
            let err = match result {
                Ok(response) if response.status().is_success() => {
                    let raw = response.bytes().await?;
                    return gunzip_if_needed(&raw);
                }
                Ok(response) => {
                    let status = response.status();
                    let err = FetchError::Status { status: status.as_u16(), url: url.to_string() };
                    if status.is_client_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => FetchError::Http(e),
            };
            if attempt >= self.retries {
                return Err(err);
            }
            warn!("GET {} failed (attempt {}/{}): {}", url, attempt, self.retries, err);
            tokio::time::sleep(Duration::from_secs(1)).await; // Wait before retrying
        }
    }

    pub async fn get_json<R: DeserializeOwned, T: Serialize + ?Sized>(&self, url: &str, params: &T) -> Result<R, FetchError> {
        let raw = self.get_bytes(url, params).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Bodies are only inflated when they carry the gzip magic.
pub fn gunzip_if_needed(raw: &[u8]) -> Result<Vec<u8>, FetchError> {
    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(raw.to_vec());
    }
    let mut decoder = GzDecoder::new(raw);
    let mut plain = Vec::new();
    decoder.read_to_end(&mut plain)?;
    debug!("inflated {} -> {} bytes", raw.len(), plain.len());
    Ok(plain)
}
