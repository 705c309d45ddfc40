use async_trait::async_trait;

/// Outbound call that actually changes a target's instance count.
///
/// Implementations are supplied by the provisioning side (orchestrator,
/// container scheduler). `Ok(false)` means the effector declined the change
/// and is recorded as a failed scaling event, same as an error.
#[async_trait]
pub trait ScalingEffector: Send + Sync {
    async fn scale_target(&self, target_id: &str, desired_instances: u32) -> anyhow::Result<bool>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::ScalingEffector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records every call; can be told to fail or to block until released
    #[derive(Default)]
    pub struct RecordingEffector {
        pub calls: Mutex<Vec<(String, u32)>>,
        fail: AtomicBool,
        decline: AtomicBool,
        hold: AtomicBool,
        pub entered: Notify,
        pub release: Notify,
    }

    impl RecordingEffector {
        pub fn failing() -> Self {
            let effector = Self::default();
            effector.set_failing(true);
            effector
        }

        pub fn declining() -> Self {
            let effector = Self::default();
            effector.decline.store(true, Ordering::SeqCst);
            effector
        }

        pub fn holding() -> Self {
            let effector = Self::default();
            effector.hold.store(true, Ordering::SeqCst);
            effector
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScalingEffector for RecordingEffector {
        async fn scale_target(&self, target_id: &str, desired: u32) -> anyhow::Result<bool> {
            self.calls.lock().unwrap().push((target_id.to_string(), desired));
            if self.hold.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("provider quota exceeded");
            }
            Ok(!self.decline.load(Ordering::SeqCst))
        }
    }
}
