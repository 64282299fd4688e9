//! Runtime configuration: worker count, io_uring tuning, cpu affinity. The
//! route tree itself is *not* configuration — it's built with the `Group`
//! builder in `wayfare::app` and compiled into the binary; this module only
//! covers the ambient server tuning knobs spec §5's concurrency model
//! exposes (worker pool size, per-endpoint listener binding).

use std::num::NonZeroUsize;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

const DEFAULT_ENTRIES: u32 = 32768;

pub const FALLBACK_PARALLELISM: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(1) };

/// Listener config + server-specific config, generic so `wayfare` can plug
/// in its own `ServerConfig` without this crate knowing about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig<LC, SC> {
    pub listener: LC,
    #[serde(flatten)]
    pub server: SC,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub worker_threads: usize,
    #[serde(default = "default_entries")]
    pub entries: u32,
    pub sqpoll_idle: Option<u32>,
    #[serde(default)]
    pub runtime_type: RuntimeType,
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: bool,
    pub thread_pool: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: default_entries(),
            sqpoll_idle: None,
            runtime_type: Default::default(),
            cpu_affinity: default_cpu_affinity(),
            thread_pool: None,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    #[cfg(target_os = "linux")]
    IoUring,
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}

const fn default_entries() -> u32 {
    DEFAULT_ENTRIES
}

const fn default_cpu_affinity() -> bool {
    false
}

/// Deserialize config bytes, sniffing JSON vs TOML from the first
/// non-whitespace byte the way the teacher codebase does.
pub fn from_slice<T: DeserializeOwned>(content: &[u8]) -> anyhow::Result<T> {
    let is_json = match content
        .iter()
        .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
    {
        Some(first) => *first == b'{',
        None => false,
    };
    if is_json {
        serde_json::from_slice::<T>(content).map_err(Into::into)
    } else {
        toml::from_str::<T>(&String::from_utf8_lossy(content)).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Tiny {
        worker_threads: Option<usize>,
    }

    #[test]
    fn sniffs_json_and_toml() {
        let json: Tiny = from_slice(br#"{"worker_threads": 4}"#).unwrap();
        assert_eq!(json.worker_threads, Some(4));

        let toml: Tiny = from_slice(b"worker_threads = 2").unwrap();
        assert_eq!(toml.worker_threads, Some(2));
    }
}
