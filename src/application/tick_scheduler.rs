use std::time::Duration;

/// Timer seam between the engine and whatever drives it. Production code uses
/// the tokio-backed driver in `runtime`; tests record the calls instead.
pub trait TimerDriver: Send {
    fn start_ticker(&mut self);
    fn stop_ticker(&mut self);
    fn schedule_finalize(&mut self, token: u64, delay: Duration);
    fn cancel_finalize(&mut self, token: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerChange {
    Started,
    Stopped,
}

/// Owns the single shared one-second ticker.
#[derive(Debug, Default)]
pub struct TickScheduler {
    active: bool,
}

impl TickScheduler {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Starts the ticker on the first running session and stops it after the
    /// last one; repeated calls with the same count do nothing.
    pub fn reconcile(
        &mut self,
        running_sessions: usize,
        driver: &mut dyn TimerDriver,
    ) -> Option<TickerChange> {
        match (self.active, running_sessions > 0) {
            (false, true) => {
                driver.start_ticker();
                self.active = true;
                tracing::debug!(running_sessions, "tick scheduler started");
                Some(TickerChange::Started)
            }
            (true, false) => {
                driver.stop_ticker();
                self.active = false;
                tracing::debug!("tick scheduler stopped");
                Some(TickerChange::Stopped)
            }
            _ => None,
        }
    }
}
