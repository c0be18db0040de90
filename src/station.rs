//! Station task
//!
//! This module contains the single cooperative task the whole subsystem
//! runs on. Commands from the rest of the stack and indications from the
//! transport arrive on one mpsc queue and are processed strictly in
//! arrival order; timers are cooperative deadlines folded into the same
//! loop. The scheduler state machine produces effects, and this task is
//! the only place they are executed, so no locking is needed anywhere in
//! the scan core.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use crate::cache::CacheEvent;
use crate::config::{LinkUsability, StationConfig};
use crate::mlme::{
    AutonomousScanIndication, MlmeTransport, ResultCode, ScanCompleteIndication, ScanIndication,
};
use crate::scan::{
    Effect, ScanReason, ScanRequest, ScanScheduler, SchedulerEvent, TimerKind,
};
use crate::{Bssid, Result, StaError};

/// Queue depth for the station message channel
const CHANNEL_CAPACITY: usize = 256;

/// A message entering the station task
#[derive(Debug)]
pub enum StationMessage {
    /// Request a scan
    Scan(ScanRequest),
    /// Cancel the in-flight scan
    Cancel,
    /// Suspend autonomous scanning
    Pause,
    /// Resume autonomous scanning
    Unpause,
    /// Link quality tier changed
    Usability(LinkUsability),
    /// Association state changed
    LinkState {
        /// The connected network, when associated
        connected: Option<(Bssid, Vec<u8>)>,
    },
    /// Scan indication from the transport
    Indication(ScanIndication),
    /// Autonomous scan indication from the transport
    AutonomousIndication(AutonomousScanIndication),
    /// Scan completion from the transport
    ScanComplete(ScanCompleteIndication),
    /// Stop the task
    Shutdown,
}

/// A notification leaving the station task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationNotification {
    /// A requested scan finished
    ScanFinished {
        /// Why the scan was requested
        reason: ScanReason,
        /// Outcome
        result: ResultCode,
    },
    /// The result cache changed
    Cache(CacheEvent),
}

/// Cloneable handle for sending messages into the station task
#[derive(Debug, Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<StationMessage>,
}

impl StationHandle {
    /// Send a message, failing when the task is gone.
    pub async fn send(&self, message: StationMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| StaError::InvalidState("station task stopped".to_string()))
    }

    /// Request a scan.
    pub async fn scan(&self, request: ScanRequest) -> Result<()> {
        self.send(StationMessage::Scan(request)).await
    }

    /// Stop the station task.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(StationMessage::Shutdown).await
    }
}

// Cooperative timer deadlines, one slot per kind.
#[derive(Debug, Default)]
struct TimerSet {
    deadlines: [Option<Instant>; 3],
}

impl TimerSet {
    fn slot(kind: TimerKind) -> usize {
        match kind {
            TimerKind::ChannelExpiry => 0,
            TimerKind::CacheExpiry => 1,
            TimerKind::UnusableFallback => 2,
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines[Self::slot(kind)] = Some(Instant::now() + after);
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[Self::slot(kind)] = None;
    }

    // Earliest armed deadline, if any.
    fn next(&self) -> Option<(TimerKind, Instant)> {
        let kinds = [
            TimerKind::ChannelExpiry,
            TimerKind::CacheExpiry,
            TimerKind::UnusableFallback,
        ];
        kinds
            .into_iter()
            .filter_map(|k| self.deadlines[Self::slot(k)].map(|d| (k, d)))
            .min_by_key(|(_, d)| *d)
    }
}

/// The station task: scheduler, transport, and message loop
pub struct Station {
    config: StationConfig,
    scheduler: ScanScheduler,
    transport: Arc<dyn MlmeTransport>,
    rx: mpsc::Receiver<StationMessage>,
    notify_tx: mpsc::Sender<StationNotification>,
    timers: TimerSet,
}

impl Station {
    /// Create a station task around a scheduler and transport. Returns
    /// the task, a handle for sending messages in, and the receiver for
    /// notifications coming out.
    pub fn new(
        config: StationConfig,
        scheduler: ScanScheduler,
        transport: Arc<dyn MlmeTransport>,
    ) -> (Self, StationHandle, mpsc::Receiver<StationNotification>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let station = Self {
            config,
            scheduler,
            transport,
            rx,
            notify_tx,
            timers: TimerSet::default(),
        };
        (station, StationHandle { tx }, notify_rx)
    }

    /// Run the station until shutdown. Starts the scheduler, then
    /// processes messages and timer deadlines in arrival order.
    pub async fn run(mut self) -> Result<()> {
        log::info!("Station task starting");
        let effects = self.scheduler.handle(SchedulerEvent::Start)?;
        self.execute(effects).await?;

        loop {
            let next_timer = self.timers.next();
            let timer_deadline = next_timer
                .map(|(_, d)| d)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                message = self.rx.recv() => {
                    match message {
                        None => break,
                        Some(StationMessage::Shutdown) => {
                            let effects = self.scheduler.handle(SchedulerEvent::Stop)?;
                            self.execute(effects).await?;
                            break;
                        }
                        Some(message) => self.dispatch(message).await?,
                    }
                }
                _ = sleep_until(timer_deadline), if next_timer.is_some() => {
                    if let Some((kind, _)) = next_timer {
                        self.timers.cancel(kind);
                        let effects = self.scheduler.handle(SchedulerEvent::TimerFired(kind))?;
                        self.execute(effects).await?;
                    }
                }
            }
        }
        log::info!("Station task stopped");
        Ok(())
    }

    async fn dispatch(&mut self, message: StationMessage) -> Result<()> {
        let event = match message {
            StationMessage::Scan(request) => {
                let reason = request.reason;
                match self.scheduler.handle(SchedulerEvent::Request(request)) {
                    Ok(effects) => return self.execute(effects).await,
                    Err(StaError::NoChannels) => {
                        // Synchronous failure: report it and carry on.
                        self.notify(StationNotification::ScanFinished {
                            reason,
                            result: ResultCode::NoChannels,
                        })
                        .await;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            StationMessage::Cancel => SchedulerEvent::Cancel,
            StationMessage::Pause => SchedulerEvent::Pause,
            StationMessage::Unpause => SchedulerEvent::Unpause,
            StationMessage::Usability(tier) => SchedulerEvent::UsabilityChanged(tier),
            StationMessage::LinkState { connected } => {
                SchedulerEvent::LinkStateChanged { connected }
            }
            StationMessage::Indication(ind) => SchedulerEvent::Indication(ind),
            StationMessage::AutonomousIndication(ind) => {
                SchedulerEvent::AutonomousIndication(ind)
            }
            StationMessage::ScanComplete(ind) => SchedulerEvent::ScanComplete(ind.result),
            StationMessage::Shutdown => unreachable!("handled by the run loop"),
        };
        let effects = self.scheduler.handle(event)?;
        self.execute(effects).await
    }

    async fn execute(&mut self, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::IssueScan(issue) => self.transport.issue_scan(issue).await?,
                Effect::AddAutonomousScan(spec) => {
                    self.transport.add_autonomous_scan(spec).await?
                }
                Effect::DeleteAutonomousScan(id) => {
                    self.transport.delete_autonomous_scan(id).await?
                }
                Effect::CancelScan => self.transport.cancel_scan().await?,
                Effect::ScanDone { reason, result } => {
                    self.notify(StationNotification::ScanFinished { reason, result })
                        .await;
                }
                Effect::CacheChanged(event) => {
                    self.notify(StationNotification::Cache(event)).await;
                }
                Effect::ArmTimer(kind) => {
                    let after = self.timer_period(kind);
                    self.timers.arm(kind, after);
                }
                Effect::CancelTimer(kind) => self.timers.cancel(kind),
            }
        }
        Ok(())
    }

    fn timer_period(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::ChannelExpiry | TimerKind::CacheExpiry => {
                Duration::from_secs(self.config.scan.expiry_check_interval_secs)
            }
            TimerKind::UnusableFallback => {
                Duration::from_secs(self.config.scan.unusable_fallback_secs)
            }
        }
    }

    async fn notify(&self, notification: StationNotification) {
        if self.notify_tx.send(notification).await.is_err() {
            log::debug!("Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::cache::{CachePolicy, ScanResultCache};
    use crate::mlme::{AutonomousScanSpec, ScanIssue};
    use crate::regulatory::{RegulatoryConfig, RegulatoryEngine};

    #[derive(Debug, Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl MlmeTransport for RecordingTransport {
        async fn issue_scan(&self, issue: ScanIssue) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("issue {:?}", issue.channels));
            Ok(())
        }

        async fn add_autonomous_scan(&self, spec: AutonomousScanSpec) -> Result<()> {
            self.calls.lock().unwrap().push(format!("add {}", spec.id));
            Ok(())
        }

        async fn delete_autonomous_scan(&self, id: u8) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", id));
            Ok(())
        }

        async fn cancel_scan(&self) -> Result<()> {
            self.calls.lock().unwrap().push("cancel".to_string());
            Ok(())
        }
    }

    fn build_station(
        transport: Arc<RecordingTransport>,
    ) -> (Station, StationHandle, mpsc::Receiver<StationNotification>) {
        let config = StationConfig::default();
        let engine = RegulatoryEngine::new(RegulatoryConfig::default());
        let cache = ScanResultCache::new(CachePolicy::default());
        let scheduler = ScanScheduler::new(config.clone(), engine, cache);
        Station::new(config, scheduler, transport)
    }

    #[tokio::test]
    async fn test_station_start_and_shutdown() {
        let transport = Arc::new(RecordingTransport::default());
        let (station, handle, _notify_rx) = build_station(transport.clone());

        let task = tokio::spawn(station.run());
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let calls = transport.calls();
        // Startup issued a scan; shutdown cancelled the in-flight one.
        assert!(calls.iter().any(|c| c.starts_with("issue")));
        assert!(calls.contains(&"cancel".to_string()));
    }

    #[tokio::test]
    async fn test_no_channel_request_is_reported() {
        let transport = Arc::new(RecordingTransport::default());
        let (station, handle, mut notify_rx) = build_station(transport.clone());
        let task = tokio::spawn(station.run());

        // Drive startup to completion so the request is not deferred.
        for _ in 0..5 {
            handle
                .send(StationMessage::ScanComplete(ScanCompleteIndication {
                    result: ResultCode::Success,
                }))
                .await
                .unwrap();
        }

        let mut request = ScanRequest::manual();
        request.channels = Some(vec![99]);
        handle.scan(request).await.unwrap();

        let notification = notify_rx.recv().await.unwrap();
        assert_eq!(
            notification,
            StationNotification::ScanFinished {
                reason: ScanReason::Manual,
                result: ResultCode::NoChannels,
            }
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
