use async_trait::async_trait;
use dossier_core::Result;
use std::time::Duration;

/// Optional external KV mirror behind the in-memory cache. The contract is
/// identical to the memory tier: values are opaque bytes, the mirror honors
/// the TTL it is given. Unavailability degrades the cache to memory-only.
#[async_trait]
pub trait CacheMirror: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Payload stored in the mirror; carries its own store time so a mirror
/// hit can be re-aged against the caller's TTL (invariant: no cache read
/// returns a value older than its TTL).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct MirrorPayload {
    pub stored_at_epoch_ms: u64,
    pub body: serde_json::Value,
}

impl MirrorPayload {
    pub fn now(body: serde_json::Value) -> Self {
        Self {
            stored_at_epoch_ms: chrono::Utc::now().timestamp_millis() as u64,
            body,
        }
    }

    /// Remaining lifetime under `ttl`, or None when already stale.
    pub fn remaining_ttl(&self, ttl: Duration) -> Option<Duration> {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let age_ms = now_ms.saturating_sub(self.stored_at_epoch_ms);
        let ttl_ms = ttl.as_millis() as u64;
        if age_ms >= ttl_ms {
            None
        } else {
            Some(Duration::from_millis(ttl_ms - age_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_ttl() {
        let fresh = MirrorPayload::now(serde_json::json!([]));
        let remaining = fresh.remaining_ttl(Duration::from_secs(60)).unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining >= Duration::from_secs(59));

        let stale = MirrorPayload {
            stored_at_epoch_ms: 0,
            body: serde_json::json!([]),
        };
        assert!(stale.remaining_ttl(Duration::from_secs(60)).is_none());
    }
}
