/*
 *  cache.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  TTL keyed store for fetched payloads, persisted to disk
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

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as TokMutex;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("fetch for '{key}' failed and nothing is cached: {reason}")]
    Fetch { key: String, reason: String },
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cache record error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wall clock used for `fetched_at`; swapped out in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub payload: Value,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now) < self.ttl
    }
}

/// What a lookup hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub is_stale: bool,
}

impl Fetched {
    fn from_entry(entry: &CacheEntry, is_stale: bool) -> Self {
        Self { payload: entry.payload.clone(), fetched_at: entry.fetched_at, is_stale }
    }
}

/// Callers within this long of a failed fetch share its outcome instead of fetching again.
pub const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(30);

/// Per-key single-flight state.
#[derive(Default)]
struct Gate {
    /// completed fetch attempts, read before queueing to spot one that ran while waiting
    attempts: AtomicU64,
    /// when the last attempt failed and why; cleared on success
    last_failure: TokMutex<Option<(DateTime<Utc>, String)>>,
}

/// Keyed payload store. One JSON record per key under `dir`; at most one fetch in flight per key.
pub struct DataCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl DataCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Data cache at {}", dir.display());
        Ok(Self {
            dir,
            clock,
            entries: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the payload for `key`, fetching only when there is no fresh entry.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Fetched, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        self.get_or_refresh(key, ttl, ttl, fetch).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) but refetches once an entry is
    /// `refresh_after` old, while it still counts as fresh until `ttl`.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh_after: Duration,
        fetch: F,
    ) -> Result<Fetched, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let gate = self.gate(key);
        let seen = gate.attempts.load(Ordering::SeqCst);
        // later callers queue here, then reuse what the first one got
        let mut last_failure = gate.last_failure.lock().await;

        let now = self.clock.now();
        let existing = self.peek(key);
        if let Some(entry) = existing.as_ref() {
            if entry.age(now) < refresh_after.min(ttl) {
                debug!("cache hit for {} (age {:?})", key, entry.age(now));
                return Ok(Fetched::from_entry(entry, false));
            }
        }

        if let Some((failed_at, reason)) = last_failure.as_ref() {
            let ran_while_waiting = gate.attempts.load(Ordering::SeqCst) != seen;
            let recent = (now - *failed_at).to_std().unwrap_or(Duration::ZERO) < RETRY_AFTER_FAILURE.min(refresh_after);
            if ran_while_waiting || recent {
                debug!("sharing failed fetch for {} from {}", key, failed_at);
                return Self::fallback(key, existing, now, reason);
            }
        }

        debug!("fetching {}", key);
        let outcome = fetch().await;
        gate.attempts.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(payload) => {
                *last_failure = None;
                let entry = CacheEntry { key: key.to_string(), fetched_at: self.clock.now(), ttl, payload };
                if let Err(e) = self.store(entry.clone()) {
                    warn!("Could not persist cache entry {}: {}", key, e);
                }
                Ok(Fetched::from_entry(&entry, false))
            }
            Err(e) => {
                let reason = format!("{e:#}");
                let result = Self::fallback(key, existing, now, &reason);
                *last_failure = Some((self.clock.now(), reason));
                result
            }
        }
    }

    /// What a failed fetch hands back: the cached copy, tagged stale past its ttl, or the error.
    fn fallback(key: &str, existing: Option<CacheEntry>, now: DateTime<Utc>, reason: &str) -> Result<Fetched, CacheError> {
        match existing {
            Some(entry) => {
                let stale = !entry.is_fresh(now);
                warn!(
                    "Fetch for {} failed ({}), serving cached copy from {}{}",
                    key,
                    reason,
                    entry.fetched_at,
                    if stale { " (stale)" } else { "" }
                );
                Ok(Fetched::from_entry(&entry, stale))
            }
            None => Err(CacheError::Fetch { key: key.to_string(), reason: reason.to_string() }),
        }
    }

    /// Current entry for `key`, from memory or the persisted record.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.lock().ok().and_then(|m| m.get(key).cloned()) {
            return Some(entry);
        }
        match self.read_record(key) {
            Ok(Some(entry)) => {
                if let Ok(mut m) = self.entries.lock() {
                    m.insert(key.to_string(), entry.clone());
                }
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable cache record for {}: {}", key, e);
                None
            }
        }
    }

    /// Keep `entry` in memory and write it through to disk.
    pub fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        if let Ok(mut m) = self.entries.lock() {
            m.insert(entry.key.clone(), entry.clone());
        }
        self.write_record(&entry)
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    /// Read the persisted record for `key`, bypassing memory.
    pub fn read_record(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.record_path(key);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = serde_json::from_str(&text)?;
        // stems are lossy, make sure the record is really ours
        Ok((entry.key == key).then_some(entry))
    }

    fn write_record(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.record_path(&entry.key);
        // one writer per record across processes; the lock is released when `lock` closes
        let lock = OpenOptions::new().create(true).write(true).truncate(false).open(path.with_extension("lock"))?;
        lock_exclusive(&lock)?;

        let writer = TMP_WRITERS.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}-{}.tmp", std::process::id(), writer));
        let written = (|| -> Result<(), CacheError> {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer(&mut file, entry)?;
            file.flush()?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written?;
        debug!("cache record written: {}", path.display());
        Ok(())
    }

    fn gate(&self, key: &str) -> Arc<Gate> {
        match self.gates.lock() {
            Ok(mut gates) => gates.entry(key.to_string()).or_default().clone(),
            // poisoned map: hand out a private gate rather than panic
            Err(_) => Arc::new(Gate::default()),
        }
    }
}

/// Distinguishes temp files of concurrent writers inside one process.
static TMP_WRITERS: AtomicU64 = AtomicU64::new(0);

/// Blocks until this process holds the only write lock on `file`; released on close.
fn lock_exclusive(file: &File) -> io::Result<()> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("myimpression-cache-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()))
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("weather:51.5074,-0.1278"), "weather_51.5074_-0.1278");
        assert_eq!(file_stem("rss:https://x.y/rss"), "rss_https___x.y_rss");
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let clock = clock();
        let cache = DataCache::with_clock(scratch("fresh"), clock.clone()).unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let ttl = Duration::from_secs(60);

        let first = cache
            .get_or_fetch("k", ttl, || async move { counter.fetch_add(1, Ordering::SeqCst); Ok(json!({"v": 1})) })
            .await
            .unwrap();
        assert!(!first.is_stale);

        clock.advance(Duration::from_secs(59));
        let second = cache
            .get_or_fetch("k", ttl, || async move { counter.fetch_add(1, Ordering::SeqCst); Ok(json!({"v": 2})) })
            .await
            .unwrap();
        assert_eq!(second.payload, json!({"v": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // age == ttl is no longer fresh
        clock.advance(Duration::from_secs(1));
        let third = cache
            .get_or_fetch("k", ttl, || async move { counter.fetch_add(1, Ordering::SeqCst); Ok(json!({"v": 3})) })
            .await
            .unwrap();
        assert_eq!(third.payload, json!({"v": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_returns_stale_copy() {
        let clock = clock();
        let cache = DataCache::with_clock(scratch("stale"), clock.clone()).unwrap();
        let ttl = Duration::from_secs(3600);
        cache.get_or_fetch("w", ttl, || async { Ok(json!([1, 2, 3])) }).await.unwrap();

        clock.advance(Duration::from_secs(7200));
        let got = cache
            .get_or_fetch("w", ttl, || async { Err(anyhow::anyhow!("HTTP 503")) })
            .await
            .unwrap();
        assert!(got.is_stale);
        assert_eq!(got.payload, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failure_without_entry_propagates() {
        let cache = DataCache::with_clock(scratch("none"), clock()).unwrap();
        let res = cache
            .get_or_fetch("missing", Duration::from_secs(10), || async { Err(anyhow::anyhow!("offline")) })
            .await;
        assert!(matches!(res, Err(CacheError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_refresh_failure_inside_ttl_is_not_stale() {
        let clock = clock();
        let cache = DataCache::with_clock(scratch("refresh"), clock.clone()).unwrap();
        let ttl = Duration::from_secs(3600);
        let every = Duration::from_secs(1800);
        cache.get_or_refresh("w", ttl, every, || async { Ok(json!(1)) }).await.unwrap();

        clock.advance(Duration::from_secs(2000));
        let got = cache
            .get_or_refresh("w", ttl, every, || async { Err(anyhow::anyhow!("timeout")) })
            .await
            .unwrap();
        assert!(!got.is_stale);
    }

    #[tokio::test]
    async fn test_concurrent_callers_fetch_once() {
        let cache = DataCache::with_clock(scratch("single"), clock()).unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let ttl = Duration::from_secs(60);
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!("payload"))
        };
        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("same", ttl, fetch),
            cache.get_or_fetch("same", ttl, fetch),
            cache.get_or_fetch("same", ttl, fetch),
        );
        assert_eq!(a.unwrap().payload, json!("payload"));
        assert_eq!(b.unwrap().payload, json!("payload"));
        assert_eq!(c.unwrap().payload, json!("payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failing_callers_fetch_once() {
        let cache = DataCache::with_clock(scratch("single-fail"), clock()).unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let ttl = Duration::from_secs(60);
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Value, _>(anyhow::anyhow!("HTTP 503"))
        };
        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("same", ttl, fetch),
            cache.get_or_fetch("same", ttl, fetch),
            cache.get_or_fetch("same", ttl, fetch),
        );
        for res in [a, b, c] {
            match res {
                Err(CacheError::Fetch { reason, .. }) => assert!(reason.contains("503")),
                other => panic!("expected fetch error, got {other:?}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failing_callers_share_stale_entry() {
        let clock = clock();
        let cache = DataCache::with_clock(scratch("single-stale"), clock.clone()).unwrap();
        let ttl = Duration::from_secs(3600);
        cache.get_or_fetch("w", ttl, || async { Ok(json!("old")) }).await.unwrap();
        clock.advance(Duration::from_secs(7200));

        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Value, _>(anyhow::anyhow!("offline"))
        };
        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("w", ttl, fetch),
            cache.get_or_fetch("w", ttl, fetch),
            cache.get_or_fetch("w", ttl, fetch),
        );
        for got in [a, b, c] {
            let got = got.unwrap();
            assert!(got.is_stale);
            assert_eq!(got.payload, json!("old"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // once the failure is old enough the next caller tries again
        clock.advance(RETRY_AFTER_FAILURE);
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("new"))
        };
        let got = cache.get_or_fetch("w", ttl, fetch).await.unwrap();
        assert_eq!(got.payload, json!("new"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_writers_leave_no_temp_files() {
        let dir = scratch("tmpfiles");
        let cache = DataCache::with_clock(&dir, clock()).unwrap();
        let entry = |n: i32| CacheEntry {
            key: "k".into(),
            fetched_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            ttl: Duration::from_secs(60),
            payload: json!(n),
        };
        std::thread::scope(|s| {
            for n in 0..4 {
                let cache = &cache;
                s.spawn(move || cache.write_record(&entry(n)).unwrap());
            }
        });
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(cache.read_record("k").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restart_reuses_persisted_entry() {
        let dir = scratch("restart");
        let clock = clock();
        {
            let cache = DataCache::with_clock(&dir, clock.clone()).unwrap();
            cache.get_or_fetch("p", Duration::from_secs(600), || async { Ok(json!({"n": 7})) }).await.unwrap();
        }
        let cache = DataCache::with_clock(&dir, clock.clone()).unwrap();
        let got = cache
            .get_or_fetch("p", Duration::from_secs(600), || async { Err(anyhow::anyhow!("must not fetch")) })
            .await
            .unwrap();
        assert!(!got.is_stale);
        assert_eq!(got.payload, json!({"n": 7}));
    }

    #[test]
    fn test_record_round_trip() {
        let cache = DataCache::with_clock(scratch("roundtrip"), clock()).unwrap();
        let entry = CacheEntry {
            key: "weather:51.5074,-0.1278".into(),
            fetched_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::nanoseconds(123_456_789),
            ttl: Duration::new(3600, 250),
            payload: json!({"current": {"temperature_2m": 12.5}, "list": [1, null, "x"]}),
        };
        cache.store(entry.clone()).unwrap();
        assert_eq!(cache.read_record(&entry.key).unwrap(), Some(entry));
    }
}
