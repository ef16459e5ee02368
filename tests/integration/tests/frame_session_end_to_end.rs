use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use playport_bridge::{
    AuthFlow, CapabilityError, CapabilityHandlers, FramePort, FramePortError,
    MemorySaveDataStore, OutboundEnvelope, RawFrameMessage, SenderRef, UsersDirectory,
    FRAME_ORIGIN_PREFIX,
};
use playport_core::ManualClock;
use playport_session::{
    mount_frame_session, runtime_clock, CampaignOverlay, DeviceClass, DeviceProfile,
    ExchangeError, FrameSession, FrameSessionConfig, FrameSessionDriver, FrameSessionServices,
    FrameSignal, GameProfile, MemoryPreferenceStore, PageEvent, PaymentPreferenceStore,
    PaymentProvider, TokenExchange,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

#[derive(Default)]
struct RecordingPort {
    posted: Mutex<Vec<OutboundEnvelope>>,
}

impl RecordingPort {
    fn posted(&self) -> Vec<OutboundEnvelope> {
        self.posted.lock().expect("posted lock").clone()
    }

    fn replies_to(&self, method: &str) -> Vec<OutboundEnvelope> {
        self.posted()
            .into_iter()
            .filter(|envelope| envelope.method == method)
            .collect()
    }
}

impl FramePort for RecordingPort {
    fn post(&self, _: &SenderRef, envelope: &OutboundEnvelope) -> Result<(), FramePortError> {
        self.posted.lock().expect("posted lock").push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CountingAuth {
    prompts: AtomicU64,
}

impl AuthFlow for CountingAuth {
    fn begin_authorization(&self, _wait_for_result: bool) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }

    fn sign_out(&self) {}
}

struct NoUsers;

#[async_trait]
impl UsersDirectory for NoUsers {
    async fn get_users(&self, _query: Value) -> Result<Value, CapabilityError> {
        Err(CapabilityError::Unavailable("users service offline".to_string()))
    }
}

struct NoCampaigns;

impl CampaignOverlay for NoCampaigns {
    fn show_campaign(&self, _data: Value) {}
}

/// Exchange whose per-provider outcome is fixed up front; counts calls.
struct ScriptedExchange {
    failing: Vec<PaymentProvider>,
    calls_a: AtomicU64,
    calls_b: AtomicU64,
}

impl ScriptedExchange {
    fn new(failing: Vec<PaymentProvider>) -> Self {
        Self {
            failing,
            calls_a: AtomicU64::new(0),
            calls_b: AtomicU64::new(0),
        }
    }

    fn calls(&self, provider: PaymentProvider) -> u64 {
        match provider {
            PaymentProvider::A => self.calls_a.load(Ordering::SeqCst),
            PaymentProvider::B => self.calls_b.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl TokenExchange for ScriptedExchange {
    async fn exchange(
        &self,
        provider: PaymentProvider,
        token: &str,
    ) -> Result<Value, ExchangeError> {
        match provider {
            PaymentProvider::A => self.calls_a.fetch_add(1, Ordering::SeqCst),
            PaymentProvider::B => self.calls_b.fetch_add(1, Ordering::SeqCst),
        };
        if self.failing.contains(&provider) {
            return Err(ExchangeError::Rejected {
                field_errors: [(
                    "token".to_string(),
                    vec![format!("{} declined", provider.as_str())],
                )]
                .into_iter()
                .collect(),
            });
        }
        Ok(json!({"provider": provider.as_str(), "token": token}))
    }
}

struct Harness {
    port: Arc<RecordingPort>,
    auth: Arc<CountingAuth>,
    exchange: Arc<ScriptedExchange>,
    preference: Arc<MemoryPreferenceStore>,
    clock: ManualClock,
    driver: FrameSessionDriver,
    page_events: broadcast::Receiver<PageEvent>,
}

impl Harness {
    fn new(class: DeviceClass, failing: Vec<PaymentProvider>) -> Self {
        let port = Arc::new(RecordingPort::default());
        let auth = Arc::new(CountingAuth::default());
        let exchange = Arc::new(ScriptedExchange::new(failing));
        let preference = Arc::new(MemoryPreferenceStore::default());
        let clock = ManualClock::new(0);
        let mut game = GameProfile::new("space-miner");
        game.auth_delay_desktop_ms = Some(300_000);
        let session = FrameSession::new(
            FrameSessionConfig::for_game(game),
            DeviceProfile {
                class,
                progressive_app: false,
            },
            clock.as_clock_fn(),
        )
        .with_preference_store(preference.clone());
        let services = services(port.clone(), auth.clone(), exchange.clone());
        let mut driver = FrameSessionDriver::new(session, services);
        let page_events = driver.subscribe_page_events();
        driver.mount();
        Self {
            port,
            auth,
            exchange,
            preference,
            clock,
            driver,
            page_events,
        }
    }

    async fn frame(&mut self, body: Value) {
        self.raw(format!("{FRAME_ORIGIN_PREFIX}message"), body.to_string())
            .await;
    }

    async fn raw(&mut self, transport_type: String, body: String) {
        self.driver
            .handle_signal(FrameSignal::Message(RawFrameMessage {
                transport_type,
                sender: SenderRef::new("game-frame"),
                body,
            }));
        self.driver.settle_pending().await;
    }

    fn page_events(&mut self) -> Vec<PageEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.page_events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn services(
    port: Arc<RecordingPort>,
    auth: Arc<CountingAuth>,
    exchange: Arc<ScriptedExchange>,
) -> FrameSessionServices {
    FrameSessionServices {
        port,
        capabilities: CapabilityHandlers::new(
            "space-miner",
            auth.clone(),
            Arc::new(NoUsers),
            Arc::new(MemorySaveDataStore::default()),
        ),
        auth,
        exchange,
        campaigns: Arc::new(NoCampaigns),
    }
}

#[tokio::test]
async fn integration_malformed_envelopes_never_reach_dispatch() {
    let mut harness = Harness::new(DeviceClass::Desktop, Vec::new());
    let before = harness.driver.session().snapshot();

    harness
        .raw(
            "analytics".to_string(),
            json!({"type": "toggleFullscreen", "data": {}}).to_string(),
        )
        .await;
    for body in [
        "{not json".to_string(),
        json!([{"type": "logout", "data": {}}]).to_string(),
        json!({"data": {}}).to_string(),
        json!({"type": "toggleFullscreen"}).to_string(),
        json!({"type": "showPayment", "data": ["tok"]}).to_string(),
    ] {
        harness
            .raw(format!("{FRAME_ORIGIN_PREFIX}message"), body)
            .await;
    }

    assert!(harness.port.posted().is_empty());
    let report = harness.driver.report();
    assert_eq!(report.ingress.rejected, 6);
    assert_eq!(report.ingress.accepted, 0);
    assert_eq!(report.snapshot, before);
    assert_eq!(harness.exchange.calls(PaymentProvider::A), 0);
}

#[tokio::test]
async fn integration_unknown_command_leaves_session_untouched() {
    let mut harness = Harness::new(DeviceClass::Mobile, Vec::new());
    harness.driver.handle_signal(FrameSignal::UserInteracted);
    harness.frame(json!({"type": "sayHello", "data": {}})).await;
    harness
        .frame(json!({"type": "showPayment", "data": {"token": "tok"}}))
        .await;
    harness.driver.handle_signal(FrameSignal::PaymentClosed { notify: false });
    harness.clock.set(1_000);
    let before = harness.driver.report();
    assert_eq!(before.snapshot.cached_checkouts, 1);
    assert!(!before.snapshot.timer_deadlines_ms.is_empty());

    harness
        .frame(json!({"type": "openLeaderboard", "data": {"season": 3}}))
        .await;

    let after = harness.driver.report();
    assert_eq!(after.snapshot, before.snapshot);
    assert_eq!(after.snapshot.cached_checkouts, before.snapshot.cached_checkouts);
    assert_eq!(
        after.snapshot.timer_deadlines_ms,
        before.snapshot.timer_deadlines_ms
    );
    assert_eq!(after.stats, before.stats);
    assert_eq!(after.ingress.ignored, before.ingress.ignored + 1);
    assert_eq!(harness.exchange.calls(PaymentProvider::A), 1);
    assert_eq!(harness.port.posted().len(), 2);
}

#[tokio::test]
async fn integration_provider_fallback_remembers_working_provider() {
    let mut harness = Harness::new(DeviceClass::Desktop, vec![PaymentProvider::A]);
    harness
        .frame(json!({"type": "showPayment", "data": {"token": "tok"}}))
        .await;

    assert_eq!(harness.preference.load(), Some(PaymentProvider::B));
    let acks = harness.port.replies_to("showPayment");
    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0].payload(),
        Some(&json!({"provider": "B", "token": "tok"}))
    );
    assert!(harness
        .page_events()
        .contains(&PageEvent::PaymentOverlayOpened {
            provider: PaymentProvider::B,
            payload: json!({"provider": "B", "token": "tok"}),
        }));

    harness.driver.handle_signal(FrameSignal::PaymentClosed { notify: true });
    harness
        .frame(json!({"type": "showPayment", "data": {"token": "tok2"}}))
        .await;
    assert_eq!(harness.exchange.calls(PaymentProvider::A), 1);
    assert_eq!(harness.exchange.calls(PaymentProvider::B), 2);
}

#[tokio::test]
async fn integration_cached_checkout_is_reused_without_exchange() {
    let mut harness = Harness::new(DeviceClass::Desktop, Vec::new());
    harness.frame(json!({"type": "showPayment", "data": "tok"})).await;
    harness.driver.handle_signal(FrameSignal::PaymentClosed { notify: false });
    harness.frame(json!({"type": "showPayment", "data": "tok"})).await;

    assert_eq!(harness.exchange.calls(PaymentProvider::A), 1);
    assert_eq!(harness.port.replies_to("showPayment").len(), 2);
    assert_eq!(harness.driver.report().stats.exchanges_started, 1);
}

#[tokio::test]
async fn integration_exhausted_providers_fail_and_close_once() {
    let mut harness = Harness::new(
        DeviceClass::Desktop,
        vec![PaymentProvider::A, PaymentProvider::B],
    );
    harness
        .frame(json!({"type": "showPayment", "data": {"token": "tok"}}))
        .await;
    harness.driver.handle_signal(FrameSignal::PaymentClosed { notify: true });

    let acks = harness.port.replies_to("showPayment");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].error(), Some(&json!({"token": ["B declined"]})));
    let closed = harness
        .page_events()
        .into_iter()
        .filter(|event| *event == PageEvent::PaymentOverlayClosed)
        .count();
    assert_eq!(closed, 1);
    assert_eq!(harness.preference.load(), None);
}

#[tokio::test]
async fn integration_capability_round_trips_through_mounted_driver() {
    let mut harness = Harness::new(DeviceClass::Desktop, Vec::new());
    harness
        .frame(json!({"type": "setSaveData", "data": {"level": 4, "coins": 12}}))
        .await;
    harness
        .frame(json!({"type": "getSaveData", "data": {"key": "level"}}))
        .await;
    harness.frame(json!({"type": "getUsers", "data": {}})).await;
    harness
        .frame(json!({"type": "authorizeAndWait", "data": {}}))
        .await;

    assert_eq!(
        harness.port.replies_to("getSaveData")[0].data,
        json!([4, null])
    );
    let users = harness.port.replies_to("getUsers");
    assert_eq!(users[0].payload(), Some(&Value::Null));
    assert_eq!(
        users[0].error().and_then(|error| error.get("code")),
        Some(&json!("unavailable"))
    );
    assert_eq!(harness.auth.prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn integration_touch_session_stretches_and_back_prompt_counts_down() {
    let mut harness = Harness::new(DeviceClass::Mobile, Vec::new());
    harness.driver.handle_signal(FrameSignal::UserInteracted);
    harness
        .frame(json!({"type": "toggleFullscreen", "data": {}}))
        .await;
    assert_eq!(
        harness.port.replies_to("toggleFullscreen")[0].data,
        json!([true, null])
    );

    harness.clock.set(5_000);
    harness.driver.tick();
    let events = harness.page_events();
    assert!(events.contains(&PageEvent::PromptChanged {
        prompt: playport_session::EngagementPrompt::BackConfirm,
        open: false,
    }));
}

#[tokio::test(start_paused = true)]
async fn integration_unmounted_session_never_fires_nudge() {
    let port = Arc::new(RecordingPort::default());
    let auth = Arc::new(CountingAuth::default());
    let exchange = Arc::new(ScriptedExchange::new(Vec::new()));
    let mut game = GameProfile::new("space-miner");
    game.auth_delay_desktop_ms = Some(60_000);
    let session = FrameSession::new(
        FrameSessionConfig::for_game(game),
        DeviceProfile::default(),
        runtime_clock(),
    );
    let mount = mount_frame_session(session, services(port, auth.clone(), exchange));

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    let report = mount.unmount().await.expect("unmount");
    assert_eq!(report.snapshot.pending_timers, 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(auth.prompts.load(Ordering::SeqCst), 0);
}
