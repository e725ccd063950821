use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> NowProvider {
    Arc::new(Utc::now)
}

/// Manually advanced clock for deterministic timing.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.set(self.now() + Duration::seconds(seconds));
    }

    pub fn provider(&self) -> NowProvider {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}
