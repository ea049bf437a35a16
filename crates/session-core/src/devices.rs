//! Audio output device bookkeeping.
//!
//! The widget remembers which audio output the user picked and routes
//! remote audio back to it whenever a session or call is rebuilt. Both
//! sides are seams: the cache is whatever persistence the host offers, the
//! output control is whatever media layer is embedding this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SessionResult;

/// Storage key for the preferred audio output device.
pub const OUTPUT_DEVICE_KEY: &str = "phone.audio.output";

/// Persistent key-value store for device preferences.
#[async_trait]
pub trait DeviceCache: Send + Sync {
    async fn get(&self, key: &str) -> SessionResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> SessionResult<()>;
}

/// Control over where remote audio is played.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Ids of the outputs currently enumerable.
    async fn list_outputs(&self) -> SessionResult<Vec<String>>;

    /// Routes remote audio to the given output.
    async fn select_output(&self, device_id: &str) -> SessionResult<()>;
}

/// Re-applies the preferred output after remote audio (re)appears.
///
/// A stored preference is honored only while that device is actually
/// enumerable. When it is unplugged the selection stays on the platform
/// default, and the preference is kept for when the device returns.
pub async fn reapply_output(
    cache: &dyn DeviceCache,
    audio: &dyn AudioOutput,
) -> SessionResult<()> {
    let Some(preferred) = cache.get(OUTPUT_DEVICE_KEY).await? else {
        return Ok(());
    };

    let outputs = audio.list_outputs().await?;
    if outputs.iter().any(|id| id == &preferred) {
        debug!("Selecting preferred audio output {}", preferred);
        audio.select_output(&preferred).await
    } else {
        debug!("Preferred audio output {} not present, keeping default", preferred);
        Ok(())
    }
}

/// Selects an output and remembers it as the preference.
pub async fn select_and_remember(
    cache: &dyn DeviceCache,
    audio: &dyn AudioOutput,
    device_id: &str,
) -> SessionResult<()> {
    audio.select_output(device_id).await?;
    cache.put(OUTPUT_DEVICE_KEY, device_id).await
}

/// In-memory [`DeviceCache`], for hosts without persistent storage and for
/// tests.
#[derive(Default)]
pub struct MemoryDeviceCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryDeviceCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceCache for MemoryDeviceCache {
    async fn get(&self, key: &str) -> SessionResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> SessionResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeAudio {
        outputs: Vec<String>,
        selected: Mutex<Option<String>>,
    }

    impl FakeAudio {
        fn new(outputs: &[&str]) -> Self {
            Self {
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
                selected: Mutex::new(None),
            }
        }

        fn selected(&self) -> Option<String> {
            self.selected.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioOutput for FakeAudio {
        async fn list_outputs(&self) -> SessionResult<Vec<String>> {
            Ok(self.outputs.clone())
        }

        async fn select_output(&self, device_id: &str) -> SessionResult<()> {
            *self.selected.lock().unwrap() = Some(device_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reapply_honors_stored_preference() {
        let cache = MemoryDeviceCache::new();
        let audio = FakeAudio::new(&["default", "headset"]);
        cache.put(OUTPUT_DEVICE_KEY, "headset").await.unwrap();

        reapply_output(&cache, &audio).await.unwrap();
        assert_eq!(audio.selected(), Some("headset".to_string()));
    }

    #[tokio::test]
    async fn test_reapply_skips_unplugged_device() {
        let cache = MemoryDeviceCache::new();
        let audio = FakeAudio::new(&["default"]);
        cache.put(OUTPUT_DEVICE_KEY, "headset").await.unwrap();

        reapply_output(&cache, &audio).await.unwrap();
        // The unplugged preference is not forced on the media layer.
        assert_eq!(audio.selected(), None);
        // But it survives for when the device comes back.
        let kept = cache.get(OUTPUT_DEVICE_KEY).await.unwrap();
        assert_eq!(kept, Some("headset".to_string()));
    }

    #[tokio::test]
    async fn test_select_and_remember() {
        let cache = MemoryDeviceCache::new();
        let audio = FakeAudio::new(&["default", "speakers"]);

        select_and_remember(&cache, &audio, "speakers").await.unwrap();
        assert_eq!(audio.selected(), Some("speakers".to_string()));
        assert_eq!(
            cache.get(OUTPUT_DEVICE_KEY).await.unwrap(),
            Some("speakers".to_string())
        );
    }

    #[tokio::test]
    async fn test_reapply_without_preference_is_a_noop() {
        let cache = MemoryDeviceCache::new();
        let audio = FakeAudio::new(&["default"]);
        reapply_output(&cache, &audio).await.unwrap();
        assert_eq!(audio.selected(), None);
    }
}
