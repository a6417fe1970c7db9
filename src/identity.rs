//! # Identity Cache
//!
//! Compute-once cache of host identity facts (machine id, OS build number).
//!
//! The first query runs the provider and stores the answer; every later query
//! returns the stored value. Concurrent first queries block on the one
//! in-flight computation instead of racing it. A failed query is not cached,
//! so the next caller retries.

use crate::error::{constants, EngineError, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::{debug, instrument};

/// Overrides the detected machine id
pub const MACHINE_ID_ENV: &str = "PACKET_ENGINE_MACHINE_ID";

/// Overrides the detected OS build number
pub const OS_BUILD_ENV: &str = "PACKET_ENGINE_OS_BUILD";

/// Source of the (possibly expensive) identity queries
pub trait IdentityProvider: Send + Sync {
    fn machine_id(&self) -> Result<String>;
    fn os_build(&self) -> Result<u32>;
}

/// Reads identity from the environment and the host OS
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentityProvider;

impl IdentityProvider for SystemIdentityProvider {
    fn machine_id(&self) -> Result<String> {
        if let Some(id) = non_empty_env(MACHINE_ID_ENV) {
            return Ok(id);
        }

        #[cfg(unix)]
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let id = contents.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }

        #[cfg(windows)]
        if let Some(name) = non_empty_env("COMPUTERNAME") {
            return Ok(name);
        }

        Err(EngineError::IdentityUnavailable(
            constants::ERR_NO_MACHINE_ID.to_string(),
        ))
    }

    fn os_build(&self) -> Result<u32> {
        if let Some(raw) = non_empty_env(OS_BUILD_ENV) {
            return raw.parse::<u32>().map_err(|_| {
                EngineError::IdentityUnavailable(format!("{OS_BUILD_ENV} is not a number: {raw}"))
            });
        }

        #[cfg(target_os = "linux")]
        if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
            if let Some(build) = parse_release(&release) {
                return Ok(build);
            }
        }

        Err(EngineError::IdentityUnavailable(
            constants::ERR_NO_OS_BUILD.to_string(),
        ))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pack a kernel release like `6.18.44-generic` into `major * 1_000_000 + minor * 1_000 + patch`
pub fn parse_release(release: &str) -> Option<u32> {
    let version = release.trim().split(|c: char| c == '-' || c == '+').next()?;
    let mut parts = version.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    if minor >= 1_000 || patch >= 1_000 {
        return None;
    }
    major.checked_mul(1_000_000)?.checked_add(minor * 1_000 + patch)
}

/// Lazily computed host identity
pub struct IdentityCache {
    provider: Box<dyn IdentityProvider>,
    machine_id: OnceCell<String>,
    os_build: OnceCell<u32>,
}

impl IdentityCache {
    pub fn new(provider: impl IdentityProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            machine_id: OnceCell::new(),
            os_build: OnceCell::new(),
        }
    }

    /// Cache backed by [`SystemIdentityProvider`]
    pub fn system() -> Self {
        Self::new(SystemIdentityProvider)
    }

    /// Machine id, queried on first call
    #[instrument(skip(self), level = "trace")]
    pub fn machine_id(&self) -> Result<&str> {
        self.machine_id
            .get_or_try_init(|| -> Result<_> {
                let id = self.provider.machine_id()?;
                debug!(len = id.len(), "Machine id computed");
                Ok(id)
            })
            .map(String::as_str)
    }

    /// OS build number, queried on first call
    #[instrument(skip(self), level = "trace")]
    pub fn os_build(&self) -> Result<u32> {
        self.os_build
            .get_or_try_init(|| -> Result<_> {
                let build = self.provider.os_build()?;
                debug!(build, "OS build computed");
                Ok(build)
            })
            .copied()
    }

    /// Whether each fact has been computed: (machine id, OS build)
    pub fn is_computed(&self) -> (bool, bool) {
        (self.machine_id.get().is_some(), self.os_build.get().is_some())
    }

    /// Forget cached values so the next query runs the provider again.
    /// Intended for tests; exclusive access rules out racing readers.
    pub fn reset(&mut self) {
        self.machine_id.take();
        self.os_build.take();
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("machine_id", &self.machine_id.get())
            .field("os_build", &self.os_build.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl IdentityProvider for Counting {
        fn machine_id(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(EngineError::IdentityUnavailable("flaky".into()));
            }
            Ok(format!("machine-{n}"))
        }

        fn os_build(&self) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(19045)
        }
    }

    #[test]
    fn test_machine_id_computed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = IdentityCache::new(Counting {
            calls: calls.clone(),
            fail_first: false,
        });
        for _ in 0..1000 {
            assert_eq!(cache.machine_id().unwrap(), "machine-0");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.is_computed(), (true, false));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = IdentityCache::new(Counting {
            calls: calls.clone(),
            fail_first: true,
        });
        assert!(cache.machine_id().is_err());
        assert_eq!(cache.machine_id().unwrap(), "machine-1");
        assert_eq!(cache.machine_id().unwrap(), "machine-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_recomputes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = IdentityCache::new(Counting {
            calls: calls.clone(),
            fail_first: false,
        });
        assert_eq!(cache.os_build().unwrap(), 19045);
        cache.reset();
        assert_eq!(cache.is_computed(), (false, false));
        assert_eq!(cache.os_build().unwrap(), 19045);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parse_release() {
        assert_eq!(parse_release("6.18.44-fc-v139\n"), Some(6_018_044));
        assert_eq!(parse_release("5.15.0-91-generic"), Some(5_015_000));
        assert_eq!(parse_release("6.1"), Some(6_001_000));
        assert_eq!(parse_release("garbage"), None);
    }
}
