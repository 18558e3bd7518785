use crate::error::{EnrichError, Result};
use log::{debug, info};
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// Bounded polling: how long to keep checking and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll: Duration) -> Self {
        WaitPolicy { timeout, poll }
    }
}

/// Calls `check` until it yields `Some`, or fails with `Timeout` once the
/// policy's timeout has elapsed. `check` always runs at least once.
pub fn wait_until<T, F>(what: &str, policy: WaitPolicy, mut check: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check()? {
            debug!("{} ready after {:?}", what, started.elapsed());
            return Ok(value);
        }
        if started.elapsed() >= policy.timeout {
            return Err(EnrichError::Timeout {
                what: what.to_string(),
                secs: policy.timeout.as_secs(),
            });
        }
        thread::sleep(policy.poll);
    }
}

/// Random pause between detail-page visits. A zero range disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    pub min: Duration,
    pub max: Duration,
}

impl Politeness {
    pub fn none() -> Self {
        Politeness {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        let ms = rng.gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }

    pub fn pause(&self) {
        let delay = self.pick();
        if delay.is_zero() {
            return;
        }
        info!("Waiting {:.1}s before next page...", delay.as_secs_f32());
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(50), Duration::from_millis(5))
    }

    #[test]
    fn wait_returns_once_condition_holds() {
        let mut calls = 0;
        let got = wait_until("counter", quick(), || {
            calls += 1;
            Ok(if calls >= 3 { Some(calls) } else { None })
        })
        .unwrap();
        assert_eq!(got, 3);
    }

    #[test]
    fn wait_times_out() {
        let err = wait_until::<(), _>("never", quick(), || Ok(None)).unwrap_err();
        assert!(matches!(err, EnrichError::Timeout { .. }));
    }

    #[test]
    fn wait_propagates_check_errors() {
        let err = wait_until::<(), _>("broken", quick(), || Err(EnrichError::store("down"))).unwrap_err();
        assert!(matches!(err, EnrichError::StoreUnavailable(_)));
    }

    #[test]
    fn politeness_stays_in_range() {
        let p = Politeness {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        };
        for _ in 0..50 {
            let d = p.pick();
            assert!(d >= p.min && d <= p.max);
        }
        assert_eq!(Politeness::none().pick(), Duration::ZERO);
    }
}
