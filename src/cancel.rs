//! Cooperative cancellation for blocking loops.
//!
//! Every sleep in the crate (poll intervals, retry backoff, settle delays)
//! goes through `CancelToken::sleep`, so a Ctrl-C wakes it immediately.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::PanectlError;

/// When a polling loop gives up. A timeout too large to add to the clock
/// never elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self::from(Instant::now(), timeout)
    }

    pub fn from(start: Instant, timeout: Duration) -> Self {
        Self(start.checked_add(timeout))
    }

    pub fn passed(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left; `Duration::MAX` for a deadline that never elapses.
    pub fn remaining(&self) -> Duration {
        match self.0 {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `dur` or until cancelled, whichever comes first.
    pub fn sleep(&self, dur: Duration) -> Result<(), PanectlError> {
        let (flag, cvar) = &*self.inner;
        let deadline = Deadline::after(dur);
        let mut cancelled = flag.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *cancelled {
                return Err(PanectlError::Cancelled);
            }
            cancelled = match deadline.0 {
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Ok(());
                    }
                    cvar.wait_timeout(cancelled, at - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => cvar.wait(cancelled).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    pub fn check(&self) -> Result<(), PanectlError> {
        if self.is_cancelled() {
            Err(PanectlError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn cancel_wakes_sleeper_promptly() {
        let token = CancelToken::new();
        let other = token.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || other.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(PanectlError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unrepresentable_sleep_waits_for_cancel() {
        let token = CancelToken::new();
        let other = token.clone();
        let handle = std::thread::spawn(move || other.sleep(Duration::MAX));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(matches!(handle.join().unwrap(), Err(PanectlError::Cancelled)));
    }

    #[test]
    fn huge_deadline_never_passes() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.passed());
        assert_eq!(deadline.remaining(), Duration::MAX);

        let short = Deadline::after(Duration::ZERO);
        assert!(short.passed());
        assert_eq!(short.remaining(), Duration::ZERO);
    }

    #[test]
    fn check_reports_cancellation() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }
}
