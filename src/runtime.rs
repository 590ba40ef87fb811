// Fixed-rate housekeeping poll loop
// Each tick reads one instrument on a blocking worker (serial I/O blocks) and
// publishes the reading plus a health value over zenoh. A failed poll is
// reported as comm_fault and the loop keeps going; the next tick retries.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::TOPIC_PREFIX;
use crate::devices::{Housekeeping, LogDict};
use crate::instrument::InstrumentError;
use crate::messages::{InstrumentInfo, Reading, RuntimeHealth};

pub type RuntimeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Topics of one instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub reading: String,
    pub health: String,
    pub identity: String,
}

impl Topics {
    pub fn for_instrument(instrument: &str) -> Self {
        Self {
            reading: format!("{}/{}/reading", TOPIC_PREFIX, instrument),
            health: format!("{}/{}/health", TOPIC_PREFIX, instrument),
            identity: format!("{}/{}/identity", TOPIC_PREFIX, instrument),
        }
    }
}

/// Tracks health transitions so faults are logged once, not every tick
pub struct Monitor {
    health: RuntimeHealth,
    consecutive_faults: u32,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            health: RuntimeHealth::Ok,
            consecutive_faults: 0,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Fold one poll result into the health state
    pub fn on_poll(&mut self, instrument: &str, result: Result<LogDict, InstrumentError>) -> Option<Reading> {
        match result {
            Ok(values) => {
                if self.health != RuntimeHealth::Ok {
                    info!("{} recovered after {} failed polls", instrument, self.consecutive_faults);
                }
                self.health = RuntimeHealth::Ok;
                self.consecutive_faults = 0;
                Some(Reading::now(instrument, values))
            }
            Err(e) => {
                if self.health != RuntimeHealth::CommFault {
                    warn!("{} poll failed: {}", instrument, e);
                } else {
                    debug!("{} still failing: {}", instrument, e);
                }
                self.health = RuntimeHealth::CommFault;
                self.consecutive_faults += 1;
                None
            }
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `device` every `period` and publish forever
pub async fn run(device: Arc<dyn Housekeeping>, period: Duration) -> RuntimeResult<()> {
    if period.is_zero() {
        return Err("poll period must be above zero".into());
    }
    let instrument = device.name().to_string();
    let topics = Topics::for_instrument(&instrument);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers...");
    let pub_reading = session.declare_publisher(topics.reading.clone()).await?;
    let pub_health = session.declare_publisher(topics.health.clone()).await?;
    let pub_identity = session.declare_publisher(topics.identity.clone()).await?;

    let identity = {
        let device = Arc::clone(&device);
        tokio::task::spawn_blocking(move || device.identity()).await?
    };
    let info = InstrumentInfo::new(&instrument, &identity);
    pub_identity.put(serde_json::to_string(&info)?).await?;

    let mut monitor = Monitor::new();
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Runtime started: polling {} every {:?}", instrument, period);
    info!("Publishing to: {}, {}", topics.reading, topics.health);

    loop {
        tick.tick().await;

        // 1. Poll on a blocking worker
        let poll = {
            let device = Arc::clone(&device);
            tokio::task::spawn_blocking(move || device.log_dict()).await?
        };

        // 2. Publish reading, if any
        if let Some(reading) = monitor.on_poll(&instrument, poll) {
            debug!("{} reading: {:?}", instrument, reading.values);
            pub_reading.put(serde_json::to_string(&reading)?).await?;
        }

        // 3. Publish health
        pub_health.put(serde_json::to_string(&monitor.health())?).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Lesker392;
    use crate::transport::MockTransport;

    #[test]
    fn test_topics() {
        let topics = Topics::for_instrument("lakeshore218");
        assert_eq!(topics.reading, "housekeeping/lakeshore218/reading");
        assert_eq!(topics.health, "housekeeping/lakeshore218/health");
    }

    #[test]
    fn test_monitor_fault_and_recovery() {
        let mut monitor = Monitor::new();
        let fault = || InstrumentError::UnknownCommand("X".to_string());

        assert!(monitor.on_poll("gauge", Err(fault())).is_none());
        assert!(monitor.on_poll("gauge", Err(fault())).is_none());
        assert_eq!(monitor.health(), RuntimeHealth::CommFault);
        assert_eq!(monitor.consecutive_faults(), 2);

        let values = LogDict::from([("p".to_string(), 1.0)]);
        let reading = monitor.on_poll("gauge", Ok(values)).unwrap();
        assert_eq!(reading.values["p"], 1.0);
        assert_eq!(monitor.health(), RuntimeHealth::Ok);
        assert_eq!(monitor.consecutive_faults(), 0);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let gauge: Arc<dyn Housekeeping> = Arc::new(Lesker392::new(MockTransport::new()));
        assert!(run(gauge, Duration::ZERO).await.is_err());
    }
}
