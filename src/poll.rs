//! Operation-complete polling.
//!
//! The 260X answers `*OPC?` with `0` while an operation is still pending and
//! a nonzero integer once it has completed. [`query_busy`] reports the
//! inverse of that flag, and [`CompletionPoll`] repeats it at a fixed rate
//! until the device is idle or one of the configured bounds is hit.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

const OPC_QUERY: &str = "*OPC?";

pub const DEFAULT_POLL_HZ: f64 = 10.0;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// How a driver waits for the device to finish an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionPoll {
    /// Status queries per second.
    pub interval_hz: f64,
    /// Give up after this many `*OPC?` queries.
    pub max_polls: Option<u32>,
    /// Give up once this much time has passed since the first query.
    pub timeout: Option<Duration>,
}

impl Default for CompletionPoll {
    fn default() -> Self {
        Self {
            interval_hz: DEFAULT_POLL_HZ,
            max_polls: None,
            timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

impl CompletionPoll {
    pub fn with_interval_hz(mut self, hz: f64) -> Self {
        self.interval_hz = hz;
        self
    }

    pub fn with_max_polls(mut self, max_polls: Option<u32>) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.interval_hz.is_finite() || self.interval_hz <= 0.0 {
            return Err(Error::Configuration(format!(
                "poll rate must be a positive number of Hz, got {}",
                self.interval_hz
            )));
        }
        if self.max_polls == Some(0) {
            return Err(Error::Configuration("max_polls must be at least 1".into()));
        }
        self.interval()?;
        Ok(())
    }

    /// Delay between two consecutive status queries.
    pub fn interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.interval_hz).map_err(|e| {
            Error::Configuration(format!(
                "poll rate {} Hz gives no usable interval: {e}",
                self.interval_hz
            ))
        })
    }

    /// Query `*OPC?` until the device reports idle. Returns the number of
    /// queries issued.
    pub async fn wait_until_idle<T>(&self, session: &mut T) -> Result<u32>
    where
        T: Transport + ?Sized,
    {
        let start = Instant::now();
        let interval = self.interval()?;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if !query_busy(session).await? {
                trace!(polls, "device idle");
                return Ok(polls);
            }

            let elapsed = start.elapsed();
            let out_of_polls = self.max_polls.is_some_and(|max| polls >= max);
            let out_of_time = self.timeout.is_some_and(|limit| elapsed >= limit);
            if out_of_polls || out_of_time {
                warn!(polls, ?elapsed, "gave up waiting for operation complete");
                return Err(Error::Timeout { polls, elapsed });
            }

            trace!(polls, "device busy, next poll in {:?}", interval);
            sleep(interval).await;
        }
    }
}

/// `true` while the device still has an operation pending (`*OPC?` == 0).
pub async fn query_busy<T>(session: &mut T) -> Result<bool>
where
    T: Transport + ?Sized,
{
    let reply = session.query(OPC_QUERY).await?;
    let flag = reply
        .trim()
        .parse::<i64>()
        .map_err(|e| Error::parse(OPC_QUERY, &reply, e))?;
    Ok(flag == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedSmu;

    #[test]
    fn default_polls_at_ten_hz() {
        let poll = CompletionPoll::default();
        assert_eq!(poll.interval().unwrap(), Duration::from_millis(100));
        assert!(poll.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_rate() {
        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let poll = CompletionPoll::default().with_interval_hz(hz);
            assert!(matches!(poll.validate(), Err(Error::Configuration(_))));
        }
        let poll = CompletionPoll::default().with_max_polls(Some(0));
        assert!(matches!(poll.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_rate_whose_period_overflows() {
        for hz in [1e-20, f64::MIN_POSITIVE] {
            let poll = CompletionPoll::default().with_interval_hz(hz);
            assert!(matches!(poll.validate(), Err(Error::Configuration(_))));
            assert!(matches!(poll.interval(), Err(Error::Configuration(_))));
        }
        assert!(CompletionPoll::default().with_interval_hz(1e-3).validate().is_ok());
    }

    #[tokio::test]
    async fn unvalidated_overflowing_rate_fails_instead_of_panicking() {
        let mut smu = SimulatedSmu::new();
        smu.force_busy(1);
        let poll = CompletionPoll::default().with_interval_hz(1e-20);
        let err = poll.wait_until_idle(&mut smu).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(smu.count_of("*OPC?"), 0);
    }

    #[tokio::test]
    async fn busy_is_inverse_of_opc_flag() {
        let mut smu = SimulatedSmu::new();
        smu.set_reply("*OPC?", "0");
        assert!(query_busy(&mut smu).await.unwrap());
        smu.set_reply("*OPC?", "1");
        assert!(!query_busy(&mut smu).await.unwrap());
        smu.set_reply("*OPC?", "7\n");
        assert!(!query_busy(&mut smu).await.unwrap());
    }

    #[tokio::test]
    async fn non_integer_opc_reply_is_parse_error() {
        let mut smu = SimulatedSmu::new();
        smu.set_reply("*OPC?", "done");
        let err = query_busy(&mut smu).await.unwrap_err();
        assert!(matches!(err, Error::Parse { ref reply, .. } if reply == "done"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_one_interval_per_busy_poll() {
        let mut smu = SimulatedSmu::new();
        smu.force_busy(4);

        let start = Instant::now();
        let polls = CompletionPoll::default().wait_until_idle(&mut smu).await.unwrap();

        assert_eq!(polls, 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(410), "{elapsed:?}");
        assert_eq!(smu.count_of("*OPC?"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_polls() {
        let mut smu = SimulatedSmu::new();
        smu.force_busy(100);

        let poll = CompletionPoll::default().with_max_polls(Some(3)).with_timeout(None);
        let err = poll.wait_until_idle(&mut smu).await.unwrap_err();

        assert!(matches!(err, Error::Timeout { polls: 3, .. }));
        assert_eq!(smu.count_of("*OPC?"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_timeout() {
        let mut smu = SimulatedSmu::new();
        smu.force_busy(1000);

        let poll = CompletionPoll::default()
            .with_interval_hz(20.0)
            .with_timeout(Some(Duration::from_millis(500)));
        let err = poll.wait_until_idle(&mut smu).await.unwrap_err();

        match err {
            Error::Timeout { polls, elapsed } => {
                assert!((11..=12).contains(&polls), "{polls}");
                assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
