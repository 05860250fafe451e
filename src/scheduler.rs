use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

/// Options for starting (or restarting) a device's emission timer.
///
/// Restarting an already-running device reads these fresh; the prior
/// timer's options are discarded along with the timer itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Invoke the callback once before the first interval elapses.
    pub emit_immediately: bool,
}

/// Independent per-device repeating emission timers.
///
/// One tokio task per device key; starting a running key aborts the prior
/// task first, so a key never has duplicate concurrent timers. Each
/// callback invocation runs its pipeline synchronously to completion, so
/// cancellation never leaves an in-flight emission behind.
#[derive(Debug, Default)]
pub struct EmissionScheduler {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl EmissionScheduler {
    pub fn new() -> Self {
        Self { timers: Mutex::new(HashMap::new()) }
    }

    /// Transition the device to running, emitting via `callback` every
    /// `interval` (and once immediately when requested).
    pub fn start_device<F>(
        &self,
        device_id: &str,
        interval: Duration,
        options: StartOptions,
        mut callback: F,
    ) where
        F: FnMut() + Send + 'static,
    {
        let mut timers = self.timers.lock().expect("scheduler poisoned");
        if let Some(prior) = timers.remove(device_id) {
            debug!(device_id, "restarting emission timer, aborting prior");
            prior.abort();
        }

        let first_tick = if options.emit_immediately {
            Instant::now()
        } else {
            Instant::now() + interval
        };
        let task_device_id = device_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, interval);
            loop {
                ticker.tick().await;
                debug!(device_id = %task_device_id, "emission tick");
                callback();
            }
        });
        timers.insert(device_id.to_string(), handle);
    }

    /// Whether this key currently has a live timer.
    pub fn is_running(&self, device_id: &str) -> bool {
        self.timers
            .lock()
            .expect("scheduler poisoned")
            .get(device_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop one device's timer. Returns whether a timer existed.
    pub fn stop_device(&self, device_id: &str) -> bool {
        let mut timers = self.timers.lock().expect("scheduler poisoned");
        match timers.remove(device_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. No further callbacks fire afterwards.
    pub fn stop_all(&self) {
        let mut timers = self.timers.lock().expect("scheduler poisoned");
        for (device_id, handle) in timers.drain() {
            debug!(device_id = %device_id, "stopping emission timer");
            handle.abort();
        }
    }

    pub fn running_count(&self) -> usize {
        self.timers
            .lock()
            .expect("scheduler poisoned")
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for EmissionScheduler {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, pause, sleep};

    #[tokio::test]
    async fn immediate_emission_fires_before_first_interval() {
        pause();
        let scheduler = EmissionScheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&count);
        scheduler.start_device(
            "dev-1",
            Duration::from_secs(10),
            StartOptions { emit_immediately: true },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn delayed_start_waits_full_interval() {
        pause();
        let scheduler = EmissionScheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&count);
        scheduler.start_device(
            "dev-1",
            Duration::from_secs(10),
            StartOptions::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn restart_replaces_prior_timer_without_duplicates() {
        pause();
        let scheduler = EmissionScheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&count);
        scheduler.start_device(
            "dev-1",
            Duration::from_secs(5),
            StartOptions::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        // Restart with a longer interval before the first tick fires.
        let counter = Arc::clone(&count);
        scheduler.start_device(
            "dev-1",
            Duration::from_secs(30),
            StartOptions::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "old timer still firing");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.running_count(), 1);
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn stop_all_halts_every_timer() {
        pause();
        let scheduler = EmissionScheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        for device in ["dev-1", "dev-2", "dev-3"] {
            let counter = Arc::clone(&count);
            scheduler.start_device(
                device,
                Duration::from_secs(5),
                StartOptions::default(),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        assert!(scheduler.is_running("dev-1"));
        assert!(scheduler.is_running("dev-2"));

        scheduler.stop_all();
        assert!(!scheduler.is_running("dev-1"));
        assert!(!scheduler.is_running("dev-2"));
        assert!(!scheduler.is_running("dev-3"));
        assert_eq!(scheduler.running_count(), 0);

        let before = count.load(Ordering::SeqCst);
        advance(Duration::from_secs(60)).await;
        assert_eq!(
            count.load(Ordering::SeqCst),
            before,
            "callback fired after stop_all"
        );
    }

    #[tokio::test]
    async fn is_running_tracks_only_its_key() {
        pause();
        let scheduler = EmissionScheduler::new();
        scheduler.start_device(
            "dev-1",
            Duration::from_secs(5),
            StartOptions::default(),
            || {},
        );

        assert!(scheduler.is_running("dev-1"));
        assert!(!scheduler.is_running("dev-2"));

        assert!(scheduler.stop_device("dev-1"));
        assert!(!scheduler.is_running("dev-1"));
        assert!(!scheduler.stop_device("dev-1"));
    }

    #[tokio::test]
    async fn emission_counts_proportional_to_inverse_intervals() {
        pause();
        let scheduler = EmissionScheduler::new();
        let fast = Arc::new(AtomicU32::new(0));
        let slow = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fast);
        scheduler.start_device(
            "fast",
            Duration::from_secs(2),
            StartOptions::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let counter = Arc::clone(&slow);
        scheduler.start_device(
            "slow",
            Duration::from_secs(10),
            StartOptions::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        for _ in 0..60 {
            sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(fast.load(Ordering::SeqCst), 30);
        assert_eq!(slow.load(Ordering::SeqCst), 6);
        scheduler.stop_all();
    }
}
