use crate::application::clock::NowProvider;
use crate::application::engine::{Engine, EngineView};
use crate::application::sync::RemoteWriter;
use crate::application::tick_scheduler::TimerDriver;
use crate::domain::models::{AccountState, RemoteDocument};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalStore;
use crate::infrastructure::remote_store::RemoteDocumentStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const TICK_PERIOD: Duration = Duration::from_secs(1);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Tick,
    Foreground,
    Snapshot { key: String, document: RemoteDocument },
    FinalizeDeletion(u64),
}

/// Timer driver backed by tokio tasks that feed `EngineEvent`s to the runtime loop.
pub struct TokioTimerDriver {
    handle: Handle,
    events: mpsc::UnboundedSender<EngineEvent>,
    tick_period: Duration,
    ticker: Option<JoinHandle<()>>,
    finalizers: HashMap<u64, JoinHandle<()>>,
}

impl TokioTimerDriver {
    pub fn new(handle: Handle, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            handle,
            events,
            tick_period: TICK_PERIOD,
            ticker: None,
            finalizers: HashMap::new(),
        }
    }
}

impl TimerDriver for TokioTimerDriver {
    fn start_ticker(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let events = self.events.clone();
        let period = self.tick_period;
        self.ticker = Some(self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            // Suspended time is recovered from anchors, not replayed as a burst of ticks.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if events.send(EngineEvent::Tick).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn schedule_finalize(&mut self, token: u64, delay: Duration) {
        self.finalizers.retain(|_, task| !task.is_finished());
        let events = self.events.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::FinalizeDeletion(token));
        });
        if let Some(previous) = self.finalizers.insert(token, task) {
            previous.abort();
        }
    }

    fn cancel_finalize(&mut self, token: u64) {
        if let Some(task) = self.finalizers.remove(&token) {
            task.abort();
        }
    }
}

impl Drop for TokioTimerDriver {
    fn drop(&mut self) {
        self.stop_ticker();
        for (_, task) in self.finalizers.drain() {
            task.abort();
        }
    }
}

struct RemoteConnection {
    key: String,
    subscription: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Owns the engine and the tasks around it: the event loop, the remote writer
/// and the snapshot subscription for the signed-in account.
pub struct EngineRuntime {
    engine: Arc<Mutex<Engine>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    event_loop: JoinHandle<()>,
    connection: Option<RemoteConnection>,
    handle: Handle,
}

impl EngineRuntime {
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        local: Arc<dyn LocalStore>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let handle = Handle::try_current().map_err(|error| {
            InfraError::InvalidConfig(format!("engine runtime requires a tokio runtime: {error}"))
        })?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let driver = TokioTimerDriver::new(handle.clone(), events.clone());
        let engine = Arc::new(Mutex::new(Engine::new(
            config,
            local,
            Box::new(driver),
            now_provider,
        )?));
        let event_loop = handle.spawn(run_event_loop(Arc::clone(&engine), events_rx));
        Ok(Self {
            engine,
            events,
            event_loop,
            connection: None,
            handle,
        })
    }

    pub fn subscribe(&self) -> Result<watch::Receiver<EngineView>, InfraError> {
        Ok(lock_engine(&self.engine)?.subscribe())
    }

    /// Runs one engine operation under the engine lock.
    pub fn with_engine<T>(
        &self,
        operation: impl FnOnce(&mut Engine) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut engine = lock_engine(&self.engine)?;
        operation(&mut engine)
    }

    pub fn notify_foreground(&self) {
        if self.events.send(EngineEvent::Foreground).is_err() {
            tracing::warn!("engine event loop is not running");
        }
    }

    pub fn remote_key(&self) -> Option<&str> {
        self.connection.as_ref().map(|connection| connection.key.as_str())
    }

    /// Switches to the account's local scope and starts syncing it with `remote`.
    /// Returns the remote document key.
    pub async fn sign_in(
        &mut self,
        account: AccountState,
        remote: Arc<dyn RemoteDocumentStore>,
    ) -> Result<String, InfraError> {
        if !account.is_authenticated() {
            return Err(InfraError::invalid_input("sign in requires an account id"));
        }
        self.drop_connection();

        let (writes, writes_rx) = mpsc::unbounded_channel();
        let (key, acks) = {
            let mut engine = lock_engine(&self.engine)?;
            engine.set_account(account)?;
            engine.connect_remote(writes)?
        };
        let writer = self.handle.spawn(
            RemoteWriter::new(Arc::clone(&remote))
                .with_acks(acks)
                .run(writes_rx),
        );

        let mut snapshots = match remote.subscribe(&key).await {
            Ok(snapshots) => snapshots,
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    error = %error,
                    "remote subscription failed; staying local-only"
                );
                lock_engine(&self.engine)?.disconnect_remote();
                return Err(error);
            }
        };
        let events = self.events.clone();
        let subscription_key = key.clone();
        let subscription = self.handle.spawn(async move {
            while let Some(document) = snapshots.recv().await {
                let event = EngineEvent::Snapshot {
                    key: subscription_key.clone(),
                    document,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        tracing::info!(key = %key, "remote sync connected");
        self.connection = Some(RemoteConnection {
            key: key.clone(),
            subscription,
            writer,
        });
        Ok(key)
    }

    /// Stops syncing and returns to the anonymous local scope.
    pub fn sign_out(&mut self) -> Result<(), InfraError> {
        if let Some(connection) = self.drop_connection() {
            tracing::info!(key = %connection.key, "remote sync disconnected");
        }
        lock_engine(&self.engine)?.set_account(AccountState::anonymous())
    }

    /// Tier change for the current account; no scope switch.
    pub fn set_premium(&self, is_premium: bool) -> Result<(), InfraError> {
        let mut engine = lock_engine(&self.engine)?;
        let account = AccountState {
            is_premium,
            ..engine.account().clone()
        };
        engine.set_account(account)
    }

    /// Stops the loop and gives queued remote writes a moment to drain.
    pub async fn shutdown(mut self) {
        let writer = self.drop_connection().map(|connection| connection.writer);
        if let Ok(mut engine) = lock_engine(&self.engine) {
            engine.disconnect_remote();
        }
        self.event_loop.abort();
        if let Some(writer) = writer {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                tracing::warn!("remote writer did not drain before shutdown");
            }
        }
    }

    /// Aborts the snapshot subscription. The writer keeps draining until the
    /// engine drops its outbox on the next scope switch.
    fn drop_connection(&mut self) -> Option<RemoteConnection> {
        let connection = self.connection.take()?;
        connection.subscription.abort();
        Some(connection)
    }
}

fn lock_engine(engine: &Mutex<Engine>) -> Result<MutexGuard<'_, Engine>, InfraError> {
    engine
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("engine lock poisoned: {error}")))
}

async fn run_event_loop(
    engine: Arc<Mutex<Engine>>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Err(error) = dispatch(&engine, event) {
            tracing::warn!(error = %error, "engine event failed");
        }
    }
    tracing::debug!("engine event loop stopped");
}

fn dispatch(engine: &Mutex<Engine>, event: EngineEvent) -> Result<(), InfraError> {
    let mut engine = lock_engine(engine)?;
    match event {
        EngineEvent::Tick => engine.tick(),
        EngineEvent::Foreground => engine.on_foreground(),
        EngineEvent::FinalizeDeletion(token) => engine.finalize_deletion(token),
        EngineEvent::Snapshot { key, document } => {
            if engine.remote_key() != Some(key.as_str()) {
                tracing::debug!(key = %key, "ignoring snapshot for a disconnected document");
                return Ok(());
            }
            engine.apply_snapshot(document)
        }
    }
}
