//! Sandbox lease
//!
//! Owns a started sandbox until it is released. Release stops the sandbox
//! at most once and never fails; a lease dropped without release (early
//! return, panic, aborted worker) schedules the stop on the current runtime.

use crate::provider::{SandboxInstance, SandboxProvider};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct SandboxLease {
    provider: Arc<dyn SandboxProvider>,
    instance: Option<SandboxInstance>,
}

impl SandboxLease {
    pub fn new(provider: Arc<dyn SandboxProvider>, instance: SandboxInstance) -> Self {
        Self {
            provider,
            instance: Some(instance),
        }
    }

    /// The leased sandbox, until released
    pub fn instance(&self) -> Option<&SandboxInstance> {
        self.instance.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.instance.is_none()
    }

    /// Stop the sandbox. Returns false when it was already released.
    pub async fn release(&mut self) -> bool {
        let Some(instance) = self.instance.take() else {
            return false;
        };

        match self.provider.stop(&instance.handle).await {
            Ok(()) => debug!(sandbox = %instance.handle, "Sandbox released"),
            Err(e) => warn!(
                sandbox = %instance.handle,
                provider = self.provider.name(),
                "Ignoring sandbox stop failure: {}", e
            ),
        }
        true
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };

        warn!(sandbox = %instance.handle, "Sandbox lease dropped without release, stopping");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let provider = Arc::clone(&self.provider);
                runtime.spawn(async move {
                    if let Err(e) = provider.stop(&instance.handle).await {
                        warn!(sandbox = %instance.handle, "Ignoring sandbox stop failure: {}", e);
                    }
                });
            }
            Err(_) => error!(
                sandbox = %instance.handle,
                "No async runtime to stop sandbox; it must be removed manually"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::provider::SandboxHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        stops: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SandboxProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn start(&self, _image: &str) -> Result<SandboxInstance, SandboxError> {
            unreachable!("lease tests never start")
        }

        async fn stop(&self, _handle: &SandboxHandle) -> Result<(), SandboxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SandboxError::StopFailed("daemon gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn instance() -> SandboxInstance {
        SandboxInstance::new(SandboxHandle::new("c-1"), "127.0.0.1", 4000)
    }

    #[tokio::test]
    async fn test_release_stops_once() {
        let provider = Arc::new(CountingProvider::default());
        let mut lease = SandboxLease::new(provider.clone(), instance());

        assert!(lease.release().await);
        assert!(!lease.release().await);
        assert!(lease.is_released());
        drop(lease);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_swallows_stop_errors() {
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..Default::default()
        });
        let mut lease = SandboxLease::new(provider.clone(), instance());
        assert!(lease.release().await);
        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_stops() {
        let provider = Arc::new(CountingProvider::default());
        drop(SandboxLease::new(provider.clone(), instance()));

        for _ in 0..50 {
            if provider.stops.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dropped lease never stopped the sandbox");
    }
}
