//! Shared cache of prepared watermarks
//!
//! Concurrent sessions compositing the same watermark onto hosts of the same
//! size can share one [`ScaledWatermark`]. Entries are inserted once and
//! never replaced.

use crate::ScaledWatermark;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use wmark_core::{Dimensions, WatermarkMode};

/// Identifies one prepared watermark
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    mode: WatermarkMode,
    scale_bits: u64,
    host: Dimensions,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, mode: WatermarkMode, scale: f64, host: Dimensions) -> Self {
        Self {
            path: path.into(),
            mode,
            scale_bits: scale.to_bits(),
            host,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scale(&self) -> f64 {
        f64::from_bits(self.scale_bits)
    }

    pub fn host(&self) -> Dimensions {
        self.host
    }
}

/// Thread-safe, insert-once cache of prepared watermarks
#[derive(Debug, Default)]
pub struct WatermarkCache {
    entries: RwLock<HashMap<CacheKey, Arc<ScaledWatermark>>>,
}

impl WatermarkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached watermark for `key`, if any
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ScaledWatermark>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Returns the cached entry or builds one with `build`.
    ///
    /// `build` runs without holding the lock, so two sessions may race to
    /// build the same key; the first insert wins and the loser's result is
    /// dropped.
    pub fn get_or_try_insert_with<E, F>(&self, key: CacheKey, build: F) -> Result<Arc<ScaledWatermark>, E>
    where
        F: FnOnce() -> Result<ScaledWatermark, E>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let built = Arc::new(build()?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.entry(key).or_insert(built).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WatermarkAsset;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn prepare(host: Dimensions) -> ScaledWatermark {
        let asset = WatermarkAsset::still(RgbaImage::from_pixel(50, 50, Rgba([1, 2, 3, 255])), false);
        ScaledWatermark::prepare(&asset, host, 0.15).unwrap()
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = WatermarkCache::new();
        let host = Dimensions::new(640, 360);
        let key = CacheKey::new("wm.png", WatermarkMode::Static, 0.15, host);
        let builds = AtomicUsize::new(0);

        let first = cache
            .get_or_try_insert_with::<(), _>(key.clone(), || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(prepare(host))
            })
            .unwrap();
        let second = cache
            .get_or_try_insert_with::<(), _>(key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(prepare(host))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_distinguish_host_and_scale() {
        let host = Dimensions::new(640, 360);
        let a = CacheKey::new("wm.png", WatermarkMode::Static, 0.15, host);
        assert_ne!(a, CacheKey::new("wm.png", WatermarkMode::Static, 0.16, host));
        assert_ne!(a, CacheKey::new("wm.png", WatermarkMode::Static, 0.15, Dimensions::new(1280, 720)));
        assert_ne!(a, CacheKey::new("other.png", WatermarkMode::Static, 0.15, host));
        assert_eq!(a.scale(), 0.15);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = WatermarkCache::new();
        let key = CacheKey::new("wm.mp4", WatermarkMode::Animated, 0.14, Dimensions::new(10, 10));
        let result = cache.get_or_try_insert_with(key.clone(), || Err("boom"));
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_readers_share_one_entry() {
        let cache = WatermarkCache::new();
        let host = Dimensions::new(320, 240);
        let key = CacheKey::new("wm.png", WatermarkMode::Static, 0.15, host);

        let results: Vec<Arc<ScaledWatermark>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = &cache;
                    let key = key.clone();
                    scope.spawn(move || {
                        cache
                            .get_or_try_insert_with::<(), _>(key, || Ok(prepare(host)))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.len(), 1);
        let stored = cache.get(&key).unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &stored)));
    }
}
