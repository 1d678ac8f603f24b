/*
 *  images.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Downloaded feed images, kept in memory and on disk
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

use image::RgbImage;
use log::{debug, info};
use mini_moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::display::compositor::{self, CompositeError};
use crate::http::{FetchError, HttpClient};

/// Decoded images held in memory; full size photos are big.
const MEMORY_SLOTS: u64 = 8;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64 bit FNV-1a. File names must not change between builds or the disk cache is orphaned.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("image store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] CompositeError),
}

#[derive(Clone)]
pub struct ImageStore {
    dir: PathBuf,
    http: HttpClient,
    memory: Arc<Cache<String, Arc<RgbImage>>>,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, http: HttpClient) -> Result<Self, ImageStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, http, memory: Arc::new(Cache::new(MEMORY_SLOTS)) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the download of `url` is kept.
    pub fn file_for(&self, url: &str) -> PathBuf {
        let ext = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "img".to_string());
        self.dir.join(format!("{:016x}.{}", fnv1a(url.as_bytes()), ext))
    }

    /// Memory, then disk, then network.
    pub async fn get(&self, url: &str) -> Result<Arc<RgbImage>, ImageStoreError> {
        if let Some(img) = self.memory.get(&url.to_string()) {
            debug!("image memory hit {}", url);
            return Ok(img);
        }

        let path = self.file_for(url);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                info!("Downloading {}", url);
                let bytes = self.http.get_bytes(url, &[] as &[(&str, &str)]).await?;
                let tmp = path.with_extension("part");
                tokio::fs::write(&tmp, &bytes).await?;
                tokio::fs::rename(&tmp, &path).await?;
                bytes
            }
        };

        let img = match compositor::decode_image(&bytes) {
            Ok(img) => Arc::new(img),
            Err(e) => {
                // a broken file would otherwise be served forever
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
        };
        self.memory.insert(url.to_string(), img.clone());
        Ok(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::time::Duration;

    fn store(name: &str) -> ImageStore {
        let dir = std::env::temp_dir().join(format!("myimpression-images-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        ImageStore::new(dir, HttpClient::new(Duration::from_secs(2), 1).unwrap()).unwrap()
    }

    #[test]
    fn test_file_names() {
        let s = store("names");
        let a = s.file_for("https://64.media.tumblr.com/abc/tumblr_x_1280.jpg?x=1");
        assert_eq!(a.extension().unwrap(), "jpg");
        let b = s.file_for("https://images-wixmp.example/f/abc/def");
        assert_eq!(b.extension().unwrap(), "img");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_names_are_stable() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        let s = store("stable");
        let path = s.file_for("https://64.media.tumblr.com/a/tumblr_blue_1280.png");
        assert_eq!(path, s.dir().join("3aef09c98e73dcb4.png"));
    }

    #[tokio::test]
    async fn test_disk_copy_used_without_network() {
        let s = store("disk");
        let url = "http://127.0.0.1:9/photo.png";
        RgbImage::from_pixel(4, 3, Rgb([0, 0, 255]))
            .save_with_format(s.file_for(url), ImageFormat::Png)
            .unwrap();
        let img = s.get(url).await.unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        let _ = std::fs::remove_dir_all(s.dir());
    }

    #[tokio::test]
    async fn test_unreachable_is_error() {
        let s = store("offline");
        assert!(matches!(s.get("http://127.0.0.1:9/missing.jpg").await, Err(ImageStoreError::Fetch(_))));
        let _ = std::fs::remove_dir_all(s.dir());
    }
}
