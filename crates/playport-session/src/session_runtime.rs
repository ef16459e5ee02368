//! Async driver for a mounted [`FrameSession`].
//!
//! [`FrameSessionDriver`] turns raw frame messages and page signals into
//! session events, and carries out the effects the machine returns. Replies go
//! through the bridge. Capability calls and token exchanges run as tasks, so a
//! slow collaborator never holds up timers or later messages; their replies
//! and results are applied when the task finishes. Host-page notifications are
//! broadcast as [`PageEvent`]s.
//! [`mount_frame_session`] runs a driver on its own task and returns a
//! [`FrameMount`] disposer that unmounts the session when it is released.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use playport_bridge::{
    AuthFlow, BridgeIngressCounters, CapabilityHandlers, CommandRoute, FrameBridge, FramePort,
    HostEvent, OutboundEnvelope, RawFrameMessage,
};
use playport_core::ClockFn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::session_machine::{
    EngagementPrompt, FrameSession, FrameSessionSnapshot, SessionEffect, SessionEvent,
    SessionView,
};
use crate::session_payment::{PaymentProvider, TokenExchange};

const PAGE_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Inputs delivered to a mounted session by the host page.
pub enum FrameSignal {
    Message(RawFrameMessage),
    UserInteracted,
    ExpandTapped,
    NativeFullscreenChanged { active: bool },
    VisibilityChanged { visible: bool },
    FrameInView { in_view: bool },
    BackPromptTapped,
    BackPromptCloseTapped,
    InformerTapped,
    InformerCloseTapped,
    PaymentClosed { notify: bool },
    SignedIn { user: Value },
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
/// In-process notifications for the rest of the host page. Never sent to the frame.
pub enum PageEvent {
    ViewChanged {
        from: SessionView,
        to: SessionView,
    },
    PromptChanged {
        prompt: EngagementPrompt,
        open: bool,
    },
    FrameMuted {
        muted: bool,
    },
    PaymentOverlayOpened {
        provider: PaymentProvider,
        payload: Value,
    },
    PaymentOverlayClosed,
}

/// Promotional overlay shown for `showCampaign`.
pub trait CampaignOverlay: Send + Sync {
    fn show_campaign(&self, data: Value);
}

#[derive(Clone)]
pub struct FrameSessionServices {
    pub port: Arc<dyn FramePort>,
    pub capabilities: CapabilityHandlers,
    pub auth: Arc<dyn AuthFlow>,
    pub exchange: Arc<dyn TokenExchange>,
    pub campaigns: Arc<dyn CampaignOverlay>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDriverStats {
    pub replies_sent: u64,
    pub host_events_sent: u64,
    pub exchanges_started: u64,
    pub auth_prompts_shown: u64,
    pub campaigns_shown: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSessionReport {
    pub snapshot: FrameSessionSnapshot,
    pub ingress: BridgeIngressCounters,
    pub stats: FrameDriverStats,
}

/// Session clock that follows tokio time, so paused-time tests drive timers.
pub fn runtime_clock() -> ClockFn {
    let origin = tokio::time::Instant::now();
    Arc::new(move || u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX))
}

pub struct FrameSessionDriver {
    session: FrameSession,
    bridge: FrameBridge,
    services: FrameSessionServices,
    page_events: broadcast::Sender<PageEvent>,
    tasks: JoinSet<DriverTaskOutcome>,
    stats: FrameDriverStats,
}

/// Result of a collaborator call running off the driver task.
enum DriverTaskOutcome {
    Reply(Option<OutboundEnvelope>),
    Session(SessionEvent),
}

impl FrameSessionDriver {
    pub fn new(session: FrameSession, services: FrameSessionServices) -> Self {
        let (page_events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);
        Self {
            session,
            bridge: FrameBridge::new(services.port.clone()),
            services,
            page_events,
            tasks: JoinSet::new(),
            stats: FrameDriverStats::default(),
        }
    }

    pub fn subscribe_page_events(&self) -> broadcast::Receiver<PageEvent> {
        self.page_events.subscribe()
    }

    pub fn session(&self) -> &FrameSession {
        &self.session
    }

    pub fn mount(&mut self) {
        self.dispatch(SessionEvent::Mounted);
    }

    /// Releases every timer that is due on the session clock.
    pub fn tick(&mut self) {
        self.dispatch(SessionEvent::TimersDue);
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.session.next_deadline_ms()
    }

    /// True while a capability call or token exchange is still running.
    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Applies one host signal. Never waits on a collaborator.
    pub fn handle_signal(&mut self, signal: FrameSignal) {
        match signal {
            FrameSignal::Message(raw) => self.handle_message(&raw),
            FrameSignal::UserInteracted => self.dispatch(SessionEvent::UserInteracted),
            FrameSignal::ExpandTapped => self.dispatch(SessionEvent::ExpandTapped),
            FrameSignal::NativeFullscreenChanged { active } => {
                self.dispatch(SessionEvent::NativeFullscreenChanged { active })
            }
            FrameSignal::VisibilityChanged { visible } => {
                self.dispatch(SessionEvent::VisibilityChanged { visible })
            }
            FrameSignal::FrameInView { in_view } => {
                self.dispatch(SessionEvent::FrameInView { in_view })
            }
            FrameSignal::BackPromptTapped => self.dispatch(SessionEvent::BackPromptTapped),
            FrameSignal::BackPromptCloseTapped => {
                self.dispatch(SessionEvent::BackPromptCloseTapped)
            }
            FrameSignal::InformerTapped => self.dispatch(SessionEvent::InformerTapped),
            FrameSignal::InformerCloseTapped => self.dispatch(SessionEvent::InformerCloseTapped),
            FrameSignal::PaymentClosed { notify } => {
                self.dispatch(SessionEvent::PaymentClosed { notify })
            }
            FrameSignal::SignedIn { user } => {
                self.dispatch(SessionEvent::AuthStateChanged { signed_in: true });
                self.emit(&HostEvent::UserChanged { user });
            }
            FrameSignal::SignedOut => {
                self.dispatch(SessionEvent::AuthStateChanged { signed_in: false });
                self.emit(&HostEvent::SignedOut);
            }
        }
    }

    /// Waits for the next collaborator task to finish and applies its outcome.
    /// Returns false when nothing was in flight.
    pub async fn settle_next_task(&mut self) -> bool {
        match self.tasks.join_next().await {
            Some(joined) => {
                self.apply_task_outcome(joined);
                true
            }
            None => false,
        }
    }

    /// Settles tasks until none are in flight, including fallback exchanges.
    pub async fn settle_pending(&mut self) {
        while self.settle_next_task().await {}
    }

    /// Unmounts the session and reports its final state.
    pub fn finish(mut self) -> FrameSessionReport {
        self.tasks.abort_all();
        self.dispatch(SessionEvent::Unmounted);
        self.report()
    }

    pub fn report(&self) -> FrameSessionReport {
        FrameSessionReport {
            snapshot: self.session.snapshot(),
            ingress: self.bridge.counters(),
            stats: self.stats,
        }
    }

    fn handle_message(&mut self, raw: &RawFrameMessage) {
        let Some(route) = self.bridge.receive(raw) else {
            return;
        };
        match route {
            CommandRoute::Capability(request) => {
                let capabilities = self.services.capabilities.clone();
                self.tasks.spawn(async move {
                    DriverTaskOutcome::Reply(capabilities.handle(request).await)
                });
            }
            CommandRoute::Session(command) => self.dispatch(SessionEvent::Command(command)),
            CommandRoute::Campaign(data) => {
                self.stats.campaigns_shown = self.stats.campaigns_shown.saturating_add(1);
                self.services.campaigns.show_campaign(data);
            }
        }
    }

    fn apply_task_outcome(
        &mut self,
        joined: std::result::Result<DriverTaskOutcome, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(DriverTaskOutcome::Reply(Some(reply))) => self.send(&reply),
            Ok(DriverTaskOutcome::Reply(None)) => {}
            Ok(DriverTaskOutcome::Session(event)) => self.dispatch(event),
            Err(error) => tracing::warn!(%error, "frame session task did not complete"),
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        for effect in self.session.apply(event) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: SessionEffect) {
        match effect {
            SessionEffect::Reply(envelope) => self.send(&envelope),
            SessionEffect::ViewChanged { from, to } => {
                self.publish(PageEvent::ViewChanged { from, to })
            }
            SessionEffect::PromptChanged { prompt, open } => {
                self.publish(PageEvent::PromptChanged { prompt, open })
            }
            SessionEffect::ShowAuthPrompt => {
                self.stats.auth_prompts_shown = self.stats.auth_prompts_shown.saturating_add(1);
                self.services.auth.begin_authorization(false);
            }
            SessionEffect::ExchangeToken { provider, token } => {
                self.stats.exchanges_started = self.stats.exchanges_started.saturating_add(1);
                let exchange = self.services.exchange.clone();
                self.tasks.spawn(async move {
                    let result = exchange.exchange(provider, &token).await;
                    DriverTaskOutcome::Session(SessionEvent::PaymentExchangeSettled {
                        provider,
                        token,
                        result,
                    })
                });
            }
            SessionEffect::RenderCheckout { provider, payload } => {
                self.publish(PageEvent::PaymentOverlayOpened { provider, payload })
            }
            SessionEffect::CloseCheckout { notify } => {
                if notify {
                    self.publish(PageEvent::PaymentOverlayClosed);
                }
            }
            SessionEffect::MuteFrame(muted) => self.publish(PageEvent::FrameMuted { muted }),
        }
    }

    fn send(&mut self, envelope: &OutboundEnvelope) {
        if self.bridge.send(envelope) {
            self.stats.replies_sent = self.stats.replies_sent.saturating_add(1);
        }
    }

    fn emit(&mut self, event: &HostEvent) {
        if self.bridge.emit(event) {
            self.stats.host_events_sent = self.stats.host_events_sent.saturating_add(1);
        }
    }

    fn publish(&self, event: PageEvent) {
        // No subscribers is fine; page listeners are optional.
        let _ = self.page_events.send(event);
    }

    fn time_until_next_deadline(&self) -> Option<Duration> {
        let deadline = self.session.next_deadline_ms()?;
        Some(Duration::from_millis(
            deadline.saturating_sub(self.session.now_ms()),
        ))
    }
}

enum MountRequest {
    Signal(FrameSignal),
    Snapshot(oneshot::Sender<FrameSessionSnapshot>),
}

/// Disposer for a mounted session. Dropping it unmounts the session.
pub struct FrameMount {
    requests: mpsc::UnboundedSender<MountRequest>,
    page_events: broadcast::Sender<PageEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<FrameSessionReport>>,
}

impl FrameMount {
    /// Queues a signal. Returns false once the session is gone.
    pub fn signal(&self, signal: FrameSignal) -> bool {
        self.requests.send(MountRequest::Signal(signal)).is_ok()
    }

    pub fn subscribe_page_events(&self) -> broadcast::Receiver<PageEvent> {
        self.page_events.subscribe()
    }

    /// Snapshot taken after every previously queued signal was handled.
    pub async fn snapshot(&self) -> Option<FrameSessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests.send(MountRequest::Snapshot(reply_tx)).ok()?;
        reply_rx.await.ok()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn unmount(mut self) -> Result<FrameSessionReport> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        let task = self
            .task
            .take()
            .context("frame session task already released")?;
        task.await.context("frame session task failed")
    }
}

impl Drop for FrameMount {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Mounts `session` on a new task. Must be called inside a tokio runtime.
pub fn mount_frame_session(session: FrameSession, services: FrameSessionServices) -> FrameMount {
    let driver = FrameSessionDriver::new(session, services);
    let page_events = driver.page_events.clone();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(run_frame_session_loop(driver, requests_rx, shutdown_rx));
    FrameMount {
        requests: requests_tx,
        page_events,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn run_frame_session_loop(
    mut driver: FrameSessionDriver,
    mut requests: mpsc::UnboundedReceiver<MountRequest>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> FrameSessionReport {
    driver.mount();
    loop {
        let until_deadline = driver.time_until_next_deadline();
        let has_tasks = driver.has_pending_tasks();
        tokio::select! {
            _ = &mut shutdown_rx => break,
            request = requests.recv() => match request {
                Some(MountRequest::Signal(signal)) => driver.handle_signal(signal),
                Some(MountRequest::Snapshot(reply_tx)) => {
                    let _ = reply_tx.send(driver.session.snapshot());
                }
                None => break,
            },
            Some(joined) = driver.tasks.join_next(), if has_tasks => {
                driver.apply_task_outcome(joined);
            }
            _ = tokio::time::sleep(until_deadline.unwrap_or_default()), if until_deadline.is_some() => {
                driver.tick();
            }
        }
    }
    let report = driver.finish();
    tracing::debug!(
        accepted = report.ingress.accepted,
        rejected = report.ingress.rejected,
        replies = report.stats.replies_sent,
        "frame session loop stopped"
    );
    report
}
