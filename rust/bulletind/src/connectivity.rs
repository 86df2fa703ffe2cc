use crate::api::SchoolApi;
use crate::error::{EngineError, EngineResult};
use crate::years::Connectivity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared link state. Any failed call may flip it to disconnected; only a
/// successful ping or request flips it back.
#[derive(Debug, Default)]
pub struct ConnectivityState {
    connected: AtomicBool,
}

impl ConnectivityState {
    pub fn get(&self) -> Connectivity {
        if self.connected.load(Ordering::SeqCst) {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }

    pub fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            log::info!("event=connectivity_changed status=connected");
        }
    }

    pub fn mark_disconnected(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::warn!("event=connectivity_changed status=disconnected reason={}", reason);
        }
    }
}

/// Linear backoff: attempt 1 waits `base`, attempt 2 waits `2 * base`, ...
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Pings up to `attempts` times, sleeping `retry_delay` before each retry.
/// Returns the 1-based attempt that succeeded.
pub fn reconnect(
    api: &dyn SchoolApi,
    state: &ConnectivityState,
    attempts: u32,
    base_delay: Duration,
    sleep: &dyn Fn(Duration),
) -> EngineResult<u32> {
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=attempts {
        if attempt > 1 {
            sleep(retry_delay(attempt - 1, base_delay));
        }
        match api.ping() {
            Ok(()) => {
                state.mark_connected();
                log::info!("event=reconnect status=ok attempt={}", attempt);
                return Ok(attempt);
            }
            Err(e) => {
                log::warn!("event=reconnect status=failed attempt={} error={}", attempt, e);
                last_error = e.to_string();
            }
        }
    }
    state.mark_disconnected(&last_error);
    Err(EngineError::Connectivity(format!(
        "gave up after {} attempts: {}",
        attempts, last_error
    )))
}

/// Background ping loop. Stopped by `stop()` or by dropping the handle.
pub struct ConnectivityMonitor {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    pub fn start(
        api: Arc<dyn SchoolApi>,
        state: Arc<ConnectivityState>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("connectivity-monitor".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match api.ping() {
                        Ok(()) => state.mark_connected(),
                        Err(e) => state.mark_disconnected(&e.to_string()),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        log::debug!(
            "event=connectivity_monitor_started interval_secs={}",
            interval.as_secs()
        );
        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            log::debug!("event=connectivity_monitor_stopped");
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiResult, OfflineApi};
    use crate::model::{MobileResult, Student, Subject, Teacher};
    use std::cell::RefCell;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn delays_grow_linearly() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(1, base), Duration::from_millis(500));
        assert_eq!(retry_delay(2, base), Duration::from_millis(1000));
        assert_eq!(retry_delay(3, base), Duration::from_millis(1500));
        assert_eq!(retry_delay(0, base), Duration::from_millis(500));
    }

    #[test]
    fn reconnect_gives_up_after_the_bound() {
        let state = ConnectivityState::default();
        state.mark_connected();
        let slept = RefCell::new(Vec::new());
        let result = reconnect(&OfflineApi, &state, 3, Duration::from_secs(1), &|d| {
            slept.borrow_mut().push(d)
        });
        assert!(matches!(result, Err(EngineError::Connectivity(_))));
        assert_eq!(
            *slept.borrow(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(state.get(), Connectivity::Disconnected);
    }

    /// Fails the first `failures` pings, then succeeds.
    struct FlakyApi {
        failures: u32,
        calls: AtomicU32,
    }

    impl SchoolApi for FlakyApi {
        fn ping(&self) -> ApiResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ApiError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
        fn list_students(&self) -> ApiResult<Vec<Student>> {
            Ok(Vec::new())
        }
        fn create_student(&self, s: &Student) -> ApiResult<Student> {
            Ok(s.clone())
        }
        fn update_student(&self, _: &str, s: &Student) -> ApiResult<Student> {
            Ok(s.clone())
        }
        fn delete_student(&self, _: &str) -> ApiResult<()> {
            Ok(())
        }
        fn list_subjects(&self) -> ApiResult<Vec<Subject>> {
            Ok(Vec::new())
        }
        fn create_subject(&self, s: &Subject) -> ApiResult<Subject> {
            Ok(s.clone())
        }
        fn update_subject(&self, _: &str, s: &Subject) -> ApiResult<Subject> {
            Ok(s.clone())
        }
        fn delete_subject(&self, _: &str) -> ApiResult<()> {
            Ok(())
        }
        fn list_teachers(&self) -> ApiResult<Vec<Teacher>> {
            Ok(Vec::new())
        }
        fn create_teacher(&self, t: &Teacher) -> ApiResult<Teacher> {
            Ok(t.clone())
        }
        fn update_teacher(&self, _: &str, t: &Teacher) -> ApiResult<Teacher> {
            Ok(t.clone())
        }
        fn delete_teacher(&self, _: &str) -> ApiResult<()> {
            Ok(())
        }
        fn list_results(&self) -> ApiResult<Vec<MobileResult>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn reconnect_reports_the_successful_attempt() {
        let api = FlakyApi {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let state = ConnectivityState::default();
        let attempt = reconnect(&api, &state, 3, Duration::ZERO, &|_| {}).expect("third try");
        assert_eq!(attempt, 3);
        assert_eq!(state.get(), Connectivity::Connected);
    }

    #[test]
    fn monitor_polls_and_stops() {
        let api = Arc::new(FlakyApi {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let state = Arc::new(ConnectivityState::default());
        let mut monitor =
            ConnectivityMonitor::start(api.clone(), state.clone(), Duration::from_millis(5))
                .expect("spawn monitor");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while state.get() != Connectivity::Connected && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert_eq!(state.get(), Connectivity::Connected);
        let calls_after_stop = api.calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(api.calls.load(Ordering::SeqCst), calls_after_stop);
    }
}
