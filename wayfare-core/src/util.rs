//! Small helpers shared across the crate: whole-file reads (used by config
//! and TLS material loading) and a URI serde adapter for config structs that
//! embed an `http::Uri`.

use std::path::Path;

use sha2::{Digest, Sha256};

pub mod uri_serde {
    use http::Uri;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }

    pub fn serialize<S>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&uri.to_string())
    }
}

/// Read an entire file into memory. Config and TLS material are small and
/// read once at start-up, so a plain `std::fs::read` under `spawn_blocking`
/// semantics (monoio schedules blocking fs ops on its own pool) is enough;
/// no streaming is needed here.
pub async fn file_read(path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
    monoio::fs::read(path).await
}

pub fn file_read_sync(path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
}

/// Weak validator for static-file ETags: `sha256(mtime_secs || ":" ||
/// len)`. Cheap to compute without reading file contents, stable across
/// server restarts as long as the file isn't touched.
pub fn weak_etag(mtime_secs: u64, len: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mtime_secs.to_le_bytes());
    hasher.update(b":");
    hasher.update(len.to_le_bytes());
    let digest = hasher.finalize();
    format!("W/\"{}\"", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::weak_etag;

    #[test]
    fn etag_is_stable_for_same_input() {
        assert_eq!(weak_etag(100, 42), weak_etag(100, 42));
        assert_ne!(weak_etag(100, 42), weak_etag(100, 43));
    }
}
