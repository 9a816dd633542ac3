//! Browser worker pool (spec §4.F): a fixed-size pool of isolated headless
//! browser sessions, keyed by slot index, with lazy recreation of
//! disconnected sessions and bounded acquisition.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::error::PoolError;

use super::session::SessionFactory;
use super::slot::{BrowserSlot, PoolStatus, SlotState};

struct Inner {
    slots: Vec<BrowserSlot>,
    available: VecDeque<usize>,
    closing: bool,
    initialized: bool,
}

impl Inner {
    fn push_available(&mut self, index: usize) {
        if !self.available.contains(&index) {
            self.available.push_back(index);
        }
    }
}

/// A borrowed slot. Must be returned via [`BrowserPool::release`].
pub struct Lease {
    pub index: usize,
}

pub struct BrowserPool {
    inner: Mutex<Inner>,
    notify: Notify,
    factory: Arc<dyn SessionFactory>,
    recreate_backoff: Duration,
    poll_interval: Duration,
}

/// Chromium-family lock sentinels: present in a profile directory while a
/// browser process still holds it open.
const LOCK_SENTINELS: &[&str] = &["SingletonLock", "SingletonCookie", "SingletonSocket"];

fn refuse_if_locked(master: &std::path::Path) -> Result<(), PoolError> {
    for sentinel in LOCK_SENTINELS {
        if master.join(sentinel).exists() {
            return Err(PoolError::MasterProfileLocked(master.to_path_buf()));
        }
    }
    Ok(())
}

fn clone_profile(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            clone_profile(&entry.path(), &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

impl BrowserPool {
    /// Launches all `size` sessions up front. On partial failure, closes
    /// whatever did launch and returns the error (all-or-nothing).
    ///
    /// Before any session is created, clones `<profile_root>/profile_master`
    /// into each slot's profile directory, refusing to proceed if the
    /// master profile still carries a lock-file sentinel (spec §5) — that
    /// indicates a browser still has it open.
    pub async fn init(
        size: usize,
        profile_root: PathBuf,
        factory: Arc<dyn SessionFactory>,
        recreate_backoff: Duration,
    ) -> Result<Self, PoolError> {
        debug!(size, "BrowserPool::init: launching sessions");
        let master = profile_root.join("profile_master");
        if master.is_dir() {
            refuse_if_locked(&master)?;
        }

        let mut slots = Vec::with_capacity(size);
        for index in 1..=size {
            let profile_path = profile_root.join(format!("profile_{index}"));
            if master.is_dir() {
                clone_profile(&master, &profile_path).map_err(|e| PoolError::SessionStartFailed(index, e.to_string()))?;
            } else {
                std::fs::create_dir_all(&profile_path).map_err(|e| PoolError::SessionStartFailed(index, e.to_string()))?;
            }
            match factory.create(&profile_path).await {
                Ok(session) => slots.push(BrowserSlot {
                    index,
                    profile_path,
                    session: Some(session),
                    state: SlotState::Available,
                }),
                Err(e) => {
                    warn!(index, error = %e, "BrowserPool::init: slot failed to launch, rolling back");
                    for mut slot in slots {
                        if let Some(mut session) = slot.session.take() {
                            let _ = session.close().await;
                        }
                    }
                    return Err(PoolError::SessionStartFailed(index, e.to_string()));
                }
            }
        }
        let available = (1..=size).collect();
        info!(size, "BrowserPool::init: all sessions launched");
        Ok(Self {
            inner: Mutex::new(Inner {
                slots,
                available,
                closing: false,
                initialized: true,
            }),
            notify: Notify::new(),
            factory,
            recreate_backoff,
            poll_interval: Duration::from_millis(50),
        })
    }

    /// Pops the head of the available list, marking it busy. Polls until a
    /// slot frees up or `timeout` elapses. Recreates a disconnected session
    /// before handing it out.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let candidate = {
                let mut inner = self.inner.lock().await;
                inner.available.pop_front()
            };

            if let Some(index) = candidate {
                let (needs_recreate, closing) = {
                    let mut inner = self.inner.lock().await;
                    let closing = inner.closing;
                    let slot = &mut inner.slots[index - 1];
                    slot.state = SlotState::Busy;
                    (!slot.session.as_ref().map(|s| s.is_connected()).unwrap_or(false), closing)
                };
                if needs_recreate {
                    if closing {
                        return Err(PoolError::Closing(index));
                    }
                    if let Err(e) = self.recreate_slot(index).await {
                        self.return_after_backoff(index).await;
                        return Err(e);
                    }
                }
                return Ok(Lease { index });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(PoolError::AcquireTimeout(timeout));
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Returns a slot to `available`. If its session is disconnected,
    /// recreates it first; on recreate failure, applies the same back-off
    /// as `acquire`.
    pub async fn release(&self, lease: Lease) {
        let index = lease.index;
        let (disconnected, closing) = {
            let inner = self.inner.lock().await;
            (
                !inner.slots[index - 1]
                    .session
                    .as_ref()
                    .map(|s| s.is_connected())
                    .unwrap_or(false),
                inner.closing,
            )
        };
        if disconnected {
            if closing {
                warn!(index, "BrowserPool::release: pool is closing, not recreating disconnected slot");
                return;
            }
            if self.recreate_slot(index).await.is_err() {
                self.return_after_backoff(index).await;
                return;
            }
        }
        let mut inner = self.inner.lock().await;
        inner.slots[index - 1].state = SlotState::Available;
        inner.push_available(index);
        drop(inner);
        self.notify.notify_one();
    }

    /// Runs `f` against the leased session, guaranteeing the slot is
    /// returned to the pool whether `f` succeeds or fails.
    pub async fn with_session<F, Fut, T>(&self, timeout: Duration, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, PoolError>>,
    {
        let lease = self.acquire(timeout).await?;
        let index = lease.index;
        let result = f(index).await;
        self.release(lease).await;
        result
    }

    pub async fn execute(&self, index: usize, url: &str) -> Result<serde_json::Value, PoolError> {
        let inner = self.inner.lock().await;
        let slot = &inner.slots[index - 1];
        let session = slot
            .session
            .as_ref()
            .ok_or_else(|| PoolError::Automation(format!("slot {index} has no session")))?;
        session.execute(url).await
    }

    async fn recreate_slot(&self, index: usize) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        inner.slots[index - 1].state = SlotState::Recreating;
        let profile_path = inner.slots[index - 1].profile_path.clone();
        drop(inner);

        let result = self.factory.create(&profile_path).await;
        let mut inner = self.inner.lock().await;
        match result {
            Ok(session) => {
                inner.slots[index - 1].session = Some(session);
                Ok(())
            }
            Err(e) => Err(PoolError::SessionStartFailed(index, e.to_string())),
        }
    }

    /// After a failed recreate, waits out the configured back-off before
    /// returning the slot to `available` rather than leaving it stranded in
    /// `recreating` forever.
    async fn return_after_backoff(&self, index: usize) {
        let backoff = self.recreate_backoff;
        warn!(index, ?backoff, "BrowserPool: returning slot to available after failed recreate back-off");
        tokio::time::sleep(backoff).await;
        let mut inner = self.inner.lock().await;
        inner.slots[index - 1].state = SlotState::Available;
        inner.push_available(index);
        drop(inner);
        self.notify.notify_one();
    }

    /// Sets the closing flag (suppresses disconnect-driven recreation),
    /// closes every session with a per-session timeout, and clears state.
    pub async fn close_all(&self, per_session_timeout: Duration) {
        let mut inner = self.inner.lock().await;
        inner.closing = true;
        for slot in inner.slots.iter_mut() {
            if let Some(mut session) = slot.session.take() {
                let result = tokio::time::timeout(per_session_timeout, session.close()).await;
                if result.is_err() {
                    warn!(index = slot.index, "BrowserPool::close_all: session close timed out, forcibly dropped");
                }
            }
            slot.state = SlotState::Recreating;
        }
        inner.available.clear();
        inner.initialized = false;
    }

    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        let busy = inner.slots.iter().filter(|s| s.state == SlotState::Busy).count();
        PoolStatus {
            total: inner.slots.len(),
            available: inner.available.len(),
            busy,
            initialized: inner.initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::session::BrowserSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeSession {
        connected: AtomicBool,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn execute(&self, _url: &str) -> Result<serde_json::Value, PoolError> {
            Ok(serde_json::json!({"ok": true}))
        }

        async fn close(&mut self) -> Result<(), PoolError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory;

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn create(&self, _profile_path: &std::path::Path) -> Result<Box<dyn BrowserSession>, PoolError> {
            Ok(Box::new(FakeSession { connected: AtomicBool::new(true) }))
        }
    }

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let pool = BrowserPool::init(2, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let status = pool.status().await;
        assert_eq!(status.busy, 1);
        pool.release(lease).await;
        let status = pool.status().await;
        assert_eq!(status.busy, 0);
        assert_eq!(status.available, 2);
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_exhausted() {
        let pool = BrowserPool::init(1, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        let _lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let result = pool.acquire(Duration::from_millis(80)).await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
    }

    #[tokio::test]
    async fn available_list_never_has_duplicates() {
        let pool = BrowserPool::init(2, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        pool.release(lease).await;
        let inner = pool.inner.lock().await;
        let mut seen = std::collections::HashSet::new();
        for idx in &inner.available {
            assert!(seen.insert(*idx), "duplicate slot in available list");
        }
    }

    #[tokio::test]
    async fn init_refuses_when_master_profile_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("profile_master");
        std::fs::create_dir_all(&master).unwrap();
        std::fs::write(master.join("SingletonLock"), b"").unwrap();

        let result = BrowserPool::init(2, dir.path().to_path_buf(), Arc::new(FakeFactory), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(PoolError::MasterProfileLocked(_))));
    }

    #[tokio::test]
    async fn init_clones_master_profile_into_each_slot() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("profile_master");
        std::fs::create_dir_all(&master).unwrap();
        std::fs::write(master.join("Preferences"), b"{}").unwrap();

        let _pool = BrowserPool::init(2, dir.path().to_path_buf(), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();

        for index in 1..=2 {
            let cloned = dir.path().join(format!("profile_{index}")).join("Preferences");
            assert!(cloned.exists());
            assert_eq!(std::fs::read(cloned).unwrap(), b"{}");
        }
    }

    #[tokio::test]
    async fn acquire_refuses_to_recreate_a_disconnected_slot_while_closing() {
        let pool = BrowserPool::init(1, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        {
            let mut inner = pool.inner.lock().await;
            inner.closing = true;
            inner.slots[0].session.as_mut().unwrap().close().await.unwrap();
        }
        let result = pool.acquire(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(PoolError::Closing(_))));
    }

    #[tokio::test]
    async fn release_does_not_recreate_a_disconnected_slot_while_closing() {
        let pool = BrowserPool::init(1, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        {
            let mut inner = pool.inner.lock().await;
            inner.closing = true;
            inner.slots[0].session.as_mut().unwrap().close().await.unwrap();
        }
        pool.release(lease).await;
        let status = pool.status().await;
        assert_eq!(status.available, 0, "a disconnected slot must not be returned to available while closing");
    }

    #[tokio::test]
    async fn with_session_releases_even_when_work_fails() {
        let pool = BrowserPool::init(1, PathBuf::from("/tmp/profiles"), Arc::new(FakeFactory), Duration::from_millis(10))
            .await
            .unwrap();
        let result: Result<(), PoolError> = pool
            .with_session(Duration::from_millis(100), |_index| async { Err(PoolError::Automation("boom".into())) })
            .await;
        assert!(result.is_err());
        let status = pool.status().await;
        assert_eq!(status.busy, 0);
        assert_eq!(status.available, 1);
    }
}
