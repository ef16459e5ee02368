//! Session lifecycle state machine for one embedded frame.
//!
//! [`FrameSession`] owns the view state, both engagement countdowns, the
//! authentication nudge, the payment coordinator and the timer queue. Every
//! input arrives as a [`SessionEvent`] through [`FrameSession::apply`], which
//! mutates state and returns the [`SessionEffect`]s the caller must carry out.
//! Nothing in here performs I/O or awaits.

use std::sync::Arc;

use playport_bridge::{BridgeMethod, OutboundEnvelope, SessionCommand};
use playport_core::ClockFn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::session_config::{DeviceProfile, FrameSessionConfig};
use crate::session_countdown::{Countdown, CountdownSnapshot};
use crate::session_nudge::{AuthDelayState, AuthNudgeSnapshot};
use crate::session_payment::{
    ExchangeError, MemoryPreferenceStore, PaymentAction, PaymentCoordinator, PaymentOverlay,
    PaymentPreferenceStore, PaymentProvider,
};
use crate::session_timer::{TimerHandle, TimerPurpose, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SessionView` values.
pub enum SessionView {
    Idle,
    Active,
    Stretched,
    Fullscreen,
}

impl SessionView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Stretched => "stretched",
            Self::Fullscreen => "fullscreen",
        }
    }

    pub fn is_expanded(self) -> bool {
        matches!(self, Self::Stretched | Self::Fullscreen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementPrompt {
    BackConfirm,
    Informer,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fullscreen request denied: {0}")]
pub struct FullscreenDenied(pub String);

/// Native fullscreen capability of the hosting platform.
pub trait FullscreenPlatform: Send + Sync {
    fn request_enter(&self) -> Result<(), FullscreenDenied>;
    fn request_exit(&self) -> Result<(), FullscreenDenied>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFullscreenPlatform {
    allow: bool,
}

impl StaticFullscreenPlatform {
    pub fn allowing() -> Self {
        Self { allow: true }
    }

    pub fn denying() -> Self {
        Self { allow: false }
    }
}

impl FullscreenPlatform for StaticFullscreenPlatform {
    fn request_enter(&self) -> Result<(), FullscreenDenied> {
        if self.allow {
            Ok(())
        } else {
            Err(FullscreenDenied("native fullscreen unavailable".to_string()))
        }
    }

    fn request_exit(&self) -> Result<(), FullscreenDenied> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Inputs accepted by [`FrameSession::apply`].
pub enum SessionEvent {
    Mounted,
    /// First click or tap on the frame's start surface.
    UserInteracted,
    /// Expand control tapped by the user (no acknowledgement is sent).
    ExpandTapped,
    Command(SessionCommand),
    NativeFullscreenChanged {
        active: bool,
    },
    VisibilityChanged {
        visible: bool,
    },
    FrameInView {
        in_view: bool,
    },
    AuthStateChanged {
        signed_in: bool,
    },
    BackPromptTapped,
    BackPromptCloseTapped,
    InformerTapped,
    InformerCloseTapped,
    PaymentExchangeSettled {
        provider: PaymentProvider,
        token: String,
        result: Result<Value, ExchangeError>,
    },
    PaymentClosed {
        notify: bool,
    },
    /// Release every timer whose deadline has passed on the session clock.
    TimersDue,
    Unmounted,
}

#[derive(Debug, Clone, PartialEq)]
/// Work requested by the machine after a transition.
pub enum SessionEffect {
    Reply(OutboundEnvelope),
    ViewChanged {
        from: SessionView,
        to: SessionView,
    },
    PromptChanged {
        prompt: EngagementPrompt,
        open: bool,
    },
    ShowAuthPrompt,
    ExchangeToken {
        provider: PaymentProvider,
        token: String,
    },
    RenderCheckout {
        provider: PaymentProvider,
        payload: Value,
    },
    CloseCheckout {
        notify: bool,
    },
    MuteFrame(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    Created,
    Mounted,
    Unmounted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSessionSnapshot {
    pub lifecycle: SessionLifecycle,
    pub view: SessionView,
    pub signed_in: bool,
    pub page_visible: bool,
    pub frame_in_view: bool,
    pub back_prompt: CountdownSnapshot,
    pub informer: CountdownSnapshot,
    pub informer_armed: bool,
    pub auth_nudge: AuthNudgeSnapshot,
    pub payment_overlay: PaymentOverlay,
    pub cached_checkouts: usize,
    pub pending_timers: usize,
    pub timer_deadlines_ms: Vec<u64>,
}

pub struct FrameSession {
    config: FrameSessionConfig,
    device: DeviceProfile,
    clock: ClockFn,
    fullscreen: Arc<dyn FullscreenPlatform>,
    lifecycle: SessionLifecycle,
    view: SessionView,
    signed_in: bool,
    page_visible: bool,
    frame_in_view: bool,
    timers: TimerQueue,
    back_prompt: Countdown,
    informer: Countdown,
    informer_arm: Option<TimerHandle>,
    informer_armed: bool,
    auth_nudge: AuthDelayState,
    payment: PaymentCoordinator,
}

impl FrameSession {
    pub fn new(config: FrameSessionConfig, device: DeviceProfile, clock: ClockFn) -> Self {
        Self {
            config,
            device,
            clock,
            fullscreen: Arc::new(StaticFullscreenPlatform::denying()),
            lifecycle: SessionLifecycle::Created,
            view: SessionView::Idle,
            signed_in: false,
            page_visible: true,
            frame_in_view: true,
            timers: TimerQueue::default(),
            back_prompt: Countdown::new(TimerPurpose::BackPromptAutoClose),
            informer: Countdown::new(TimerPurpose::InformerAutoClose),
            informer_arm: None,
            informer_armed: false,
            auth_nudge: AuthDelayState::default(),
            payment: PaymentCoordinator::new(Arc::new(MemoryPreferenceStore::default())),
        }
    }

    pub fn with_fullscreen_platform(mut self, platform: Arc<dyn FullscreenPlatform>) -> Self {
        self.fullscreen = platform;
        self
    }

    pub fn with_preference_store(mut self, preference: Arc<dyn PaymentPreferenceStore>) -> Self {
        self.payment = PaymentCoordinator::new(preference);
        self
    }

    pub fn with_signed_in(mut self, signed_in: bool) -> Self {
        self.signed_in = signed_in;
        self
    }

    pub fn view(&self) -> SessionView {
        self.view
    }

    pub fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    /// Earliest pending timer deadline on the session clock.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.timers.next_deadline_ms()
    }

    pub fn snapshot(&self) -> FrameSessionSnapshot {
        FrameSessionSnapshot {
            lifecycle: self.lifecycle,
            view: self.view,
            signed_in: self.signed_in,
            page_visible: self.page_visible,
            frame_in_view: self.frame_in_view,
            back_prompt: self.back_prompt.snapshot(),
            informer: self.informer.snapshot(),
            informer_armed: self.informer_armed,
            auth_nudge: self.auth_nudge.snapshot(self.now_ms()),
            payment_overlay: self.payment.overlay(),
            cached_checkouts: self.payment.cached_payloads(),
            pending_timers: self.timers.len(),
            timer_deadlines_ms: self.timers.deadlines_ms(),
        }
    }

    /// Single transition function. Events outside the mounted lifetime are ignored.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        match self.lifecycle {
            SessionLifecycle::Created if event != SessionEvent::Mounted => {
                tracing::debug!(?event, "session event before mount ignored");
                return Vec::new();
            }
            SessionLifecycle::Unmounted => {
                tracing::debug!(?event, "session event after unmount ignored");
                return Vec::new();
            }
            _ => {}
        }

        let now_ms = self.now_ms();
        let mut effects = Vec::new();
        match event {
            SessionEvent::Mounted => self.on_mounted(now_ms, &mut effects),
            SessionEvent::UserInteracted => {
                if self.view == SessionView::Idle {
                    self.enter_active(now_ms, &mut effects);
                }
            }
            SessionEvent::ExpandTapped => self.toggle_expanded(now_ms, &mut effects),
            SessionEvent::Command(SessionCommand::ToggleFullscreen) => {
                self.toggle_expanded(now_ms, &mut effects);
                effects.push(SessionEffect::Reply(OutboundEnvelope::ack(
                    BridgeMethod::ToggleFullscreen,
                    json!(self.view.is_expanded()),
                    None,
                )));
            }
            SessionEvent::Command(SessionCommand::ShowPayment { token }) => {
                let actions = self.payment.open(&token);
                push_payment_effects(actions, &mut effects);
            }
            SessionEvent::NativeFullscreenChanged { active } => {
                match (active, self.view) {
                    (true, SessionView::Active) => {
                        self.set_view(SessionView::Fullscreen, &mut effects)
                    }
                    (false, SessionView::Fullscreen) => {
                        self.set_view(SessionView::Active, &mut effects)
                    }
                    _ => {}
                }
            }
            SessionEvent::VisibilityChanged { visible } => {
                self.page_visible = visible;
                self.auth_nudge
                    .on_visibility_changed(&mut self.timers, now_ms, visible);
            }
            SessionEvent::FrameInView { in_view } => {
                if self.frame_in_view != in_view {
                    self.frame_in_view = in_view;
                    effects.push(SessionEffect::MuteFrame(!in_view));
                }
            }
            SessionEvent::AuthStateChanged { signed_in } => {
                self.on_auth_state_changed(signed_in, &mut effects)
            }
            SessionEvent::BackPromptTapped => self.on_back_prompt_tapped(now_ms, &mut effects),
            SessionEvent::BackPromptCloseTapped => {
                if self.back_prompt.close_tapped(&mut self.timers) {
                    push_prompt(EngagementPrompt::BackConfirm, false, &mut effects);
                }
            }
            SessionEvent::InformerTapped => self.on_informer_tapped(now_ms, &mut effects),
            SessionEvent::InformerCloseTapped => {
                if self.informer.close_tapped(&mut self.timers) {
                    push_prompt(EngagementPrompt::Informer, false, &mut effects);
                }
            }
            SessionEvent::PaymentExchangeSettled {
                provider,
                token,
                result,
            } => {
                let actions = self.payment.settle(provider, &token, result);
                push_payment_effects(actions, &mut effects);
            }
            SessionEvent::PaymentClosed { notify } => {
                let actions = self.payment.close(notify);
                push_payment_effects(actions, &mut effects);
            }
            SessionEvent::TimersDue => self.release_due_timers(now_ms, &mut effects),
            SessionEvent::Unmounted => self.on_unmounted(&mut effects),
        }
        effects
    }

    fn on_mounted(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        if self.lifecycle != SessionLifecycle::Created {
            return;
        }
        self.lifecycle = SessionLifecycle::Mounted;
        let class = self.device.class;
        let auto_start = !class.is_touch()
            || self.device.progressive_app
            || self.config.game.autoplays_on(class);
        tracing::debug!(
            game_id = self.config.game.game_id.as_str(),
            device = class.as_str(),
            auto_start,
            "frame session mounted"
        );
        if auto_start {
            self.enter_active(now_ms, effects);
        }
    }

    fn enter_active(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        self.set_view(SessionView::Active, effects);
        if self.signed_in {
            return;
        }
        let timings = self.config.timings;
        self.informer_arm = Some(self.timers.schedule(
            now_ms,
            timings.informer_arm_delay_ms,
            TimerPurpose::InformerArm,
        ));
        if self.config.game.auth_nudge_exempt {
            tracing::debug!(
                game_id = self.config.game.game_id.as_str(),
                "auth nudge skipped for exempt game"
            );
            return;
        }
        let delay_ms = self.config.game.auth_delay_ms(self.device.class, &timings);
        self.auth_nudge
            .arm(&mut self.timers, now_ms, delay_ms, self.page_visible);
    }

    fn toggle_expanded(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        let uses_stretch = self.device.class.is_touch() || self.config.game.software_fullscreen;
        match self.view {
            SessionView::Idle => {}
            SessionView::Active if uses_stretch => {
                self.set_view(SessionView::Stretched, effects);
                if self.device.class.is_touch() {
                    let window_ms = self.config.timings.back_prompt_auto_close_ms;
                    if self.back_prompt.open(&mut self.timers, now_ms, window_ms) {
                        push_prompt(EngagementPrompt::BackConfirm, true, effects);
                    }
                }
            }
            SessionView::Active => match self.fullscreen.request_enter() {
                Ok(()) => self.set_view(SessionView::Fullscreen, effects),
                Err(error) => tracing::debug!(%error, "native fullscreen request swallowed"),
            },
            SessionView::Stretched => {
                self.set_view(SessionView::Active, effects);
                if self.back_prompt.dismiss(&mut self.timers) {
                    push_prompt(EngagementPrompt::BackConfirm, false, effects);
                }
            }
            SessionView::Fullscreen => match self.fullscreen.request_exit() {
                Ok(()) => self.set_view(SessionView::Active, effects),
                Err(error) => tracing::debug!(%error, "native fullscreen exit swallowed"),
            },
        }
    }

    fn on_back_prompt_tapped(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        if self.view != SessionView::Stretched {
            return;
        }
        if self.back_prompt.is_open() {
            self.toggle_expanded(now_ms, effects);
            return;
        }
        let window_ms = self.config.timings.back_prompt_auto_close_ms;
        if self.back_prompt.tap(&mut self.timers, now_ms, window_ms) {
            push_prompt(EngagementPrompt::BackConfirm, true, effects);
        }
    }

    fn on_informer_tapped(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        if !self.informer_armed || self.signed_in {
            return;
        }
        if self.informer.is_open() {
            self.informer.close_tapped(&mut self.timers);
            push_prompt(EngagementPrompt::Informer, false, effects);
            effects.push(SessionEffect::ShowAuthPrompt);
            return;
        }
        let window_ms = self.config.timings.informer_auto_close_ms;
        if self.informer.tap(&mut self.timers, now_ms, window_ms) {
            push_prompt(EngagementPrompt::Informer, true, effects);
        }
    }

    fn on_auth_state_changed(&mut self, signed_in: bool, effects: &mut Vec<SessionEffect>) {
        self.signed_in = signed_in;
        if !signed_in {
            return;
        }
        if self.auth_nudge.cancel(&mut self.timers) {
            tracing::debug!("auth nudge cancelled after sign-in");
        }
        if let Some(handle) = self.informer_arm.take() {
            self.timers.cancel(handle);
        }
        if self.informer.dismiss(&mut self.timers) {
            push_prompt(EngagementPrompt::Informer, false, effects);
        }
    }

    fn release_due_timers(&mut self, now_ms: u64, effects: &mut Vec<SessionEffect>) {
        for (handle, purpose) in self.timers.pop_due(now_ms) {
            tracing::debug!(
                timer = handle.id(),
                purpose = purpose.as_str(),
                now_ms,
                "session timer fired"
            );
            match purpose {
                TimerPurpose::AuthNudge => {
                    if self.auth_nudge.on_timer_fired(handle) && !self.signed_in {
                        effects.push(SessionEffect::ShowAuthPrompt);
                    }
                }
                TimerPurpose::BackPromptAutoClose => {
                    if self.back_prompt.on_timer_fired(handle) {
                        push_prompt(EngagementPrompt::BackConfirm, false, effects);
                    }
                }
                TimerPurpose::InformerArm => {
                    if self.informer_arm != Some(handle) {
                        continue;
                    }
                    self.informer_arm = None;
                    if self.signed_in {
                        continue;
                    }
                    self.informer_armed = true;
                    let window_ms = self.config.timings.informer_auto_close_ms;
                    if self.informer.open(&mut self.timers, now_ms, window_ms) {
                        push_prompt(EngagementPrompt::Informer, true, effects);
                    }
                }
                TimerPurpose::InformerAutoClose => {
                    if self.informer.on_timer_fired(handle) {
                        push_prompt(EngagementPrompt::Informer, false, effects);
                    }
                }
            }
        }
    }

    fn on_unmounted(&mut self, effects: &mut Vec<SessionEffect>) {
        let cancelled = self.timers.cancel_all();
        self.informer_arm = None;
        self.back_prompt.dismiss(&mut self.timers);
        self.informer.dismiss(&mut self.timers);
        self.auth_nudge.cancel(&mut self.timers);
        push_payment_effects(self.payment.close(false), effects);
        self.lifecycle = SessionLifecycle::Unmounted;
        tracing::debug!(cancelled_timers = cancelled, "frame session unmounted");
    }

    fn set_view(&mut self, to: SessionView, effects: &mut Vec<SessionEffect>) {
        let from = self.view;
        if from == to {
            return;
        }
        self.view = to;
        effects.push(SessionEffect::ViewChanged { from, to });
    }
}

fn push_prompt(prompt: EngagementPrompt, open: bool, effects: &mut Vec<SessionEffect>) {
    effects.push(SessionEffect::PromptChanged { prompt, open });
}

fn push_payment_effects(actions: Vec<PaymentAction>, effects: &mut Vec<SessionEffect>) {
    for action in actions {
        match action {
            PaymentAction::Exchange { provider, token } => {
                effects.push(SessionEffect::ExchangeToken { provider, token })
            }
            PaymentAction::Render { provider, payload } => {
                effects.push(SessionEffect::Reply(OutboundEnvelope::ack(
                    BridgeMethod::ShowPayment,
                    payload.clone(),
                    None,
                )));
                effects.push(SessionEffect::RenderCheckout { provider, payload });
            }
            PaymentAction::Failed { errors } => {
                effects.push(SessionEffect::Reply(OutboundEnvelope::ack(
                    BridgeMethod::ShowPayment,
                    Value::Null,
                    Some(errors),
                )));
            }
            PaymentAction::Close { notify } => effects.push(SessionEffect::CloseCheckout { notify }),
        }
    }
}
