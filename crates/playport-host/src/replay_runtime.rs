//! `replay`: drives a mounted session from a timed signal transcript on a
//! virtual clock, releasing timers exactly at their deadlines between lines.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use playport_bridge::{CapabilityHandlers, MemorySaveDataStore};
use playport_core::ManualClock;
use playport_session::{
    load_frame_session_config, DeviceProfile, FilePreferenceStore, FrameSession,
    FrameSessionConfig, FrameSessionDriver, FrameSessionReport, FrameSessionServices,
    FrameSignal, HttpTokenExchange, MemoryPreferenceStore, PageEvent, PaymentPreferenceStore,
    PaymentProvider, StaticFullscreenPlatform, TokenExchange,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::cli_args::{CliNativeFullscreen, ReplayArgs};
use crate::replay_collaborators::{
    LoopbackTokenExchange, ReplayAuthFlow, ReplayCampaigns, ReplayFramePort, ReplayLog,
    StaticUsersDirectory,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct TranscriptEntry {
    pub(crate) at_ms: u64,
    pub(crate) signal: FrameSignal,
}

/// Parses NDJSON transcript lines. Blank lines and `#` comments are skipped;
/// timestamps must not go backwards.
pub(crate) fn parse_transcript(raw: &str) -> Result<Vec<TranscriptEntry>> {
    let mut entries = Vec::new();
    let mut last_at_ms = 0_u64;
    for (index, line) in raw.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry = serde_json::from_str::<TranscriptEntry>(trimmed)
            .with_context(|| format!("invalid transcript entry on line {line_number}"))?;
        if entry.at_ms < last_at_ms {
            bail!(
                "transcript line {line_number} goes back in time ({} < {last_at_ms})",
                entry.at_ms
            );
        }
        last_at_ms = entry.at_ms;
        entries.push(entry);
    }
    Ok(entries)
}

pub(crate) struct ReplayOptions {
    pub(crate) config: FrameSessionConfig,
    pub(crate) device: DeviceProfile,
    pub(crate) signed_in: bool,
    pub(crate) native_fullscreen: CliNativeFullscreen,
    pub(crate) until_ms: Option<u64>,
    pub(crate) fail_provider: Vec<PaymentProvider>,
}

impl ReplayOptions {
    pub(crate) fn from_args(args: &ReplayArgs) -> Result<Self> {
        Ok(Self {
            config: load_frame_session_config(&args.config)?,
            device: DeviceProfile {
                class: args.device.into(),
                progressive_app: args.progressive_app,
            },
            signed_in: args.signed_in,
            native_fullscreen: args.native_fullscreen,
            until_ms: args.until_ms,
            fail_provider: args.fail_provider.clone(),
        })
    }
}

pub(crate) struct ReplayOutcome {
    pub(crate) lines: Vec<Value>,
    pub(crate) report: FrameSessionReport,
}

fn build_token_exchange(options: &ReplayOptions) -> Result<Arc<dyn TokenExchange>> {
    match &options.config.payment.exchange_url {
        Some(url) => Ok(Arc::new(HttpTokenExchange::new(
            url.as_str(),
            options.config.payment.request_timeout_ms,
        )?)),
        None => Ok(Arc::new(LoopbackTokenExchange {
            failing: options.fail_provider.clone(),
        })),
    }
}

fn build_preference_store(options: &ReplayOptions) -> Arc<dyn PaymentPreferenceStore> {
    match &options.config.payment.preference_path {
        Some(path) => Arc::new(FilePreferenceStore::new(path)),
        None => Arc::new(MemoryPreferenceStore::default()),
    }
}

pub(crate) async fn run_replay(
    options: ReplayOptions,
    transcript: Vec<TranscriptEntry>,
) -> Result<ReplayOutcome> {
    let clock = ManualClock::new(0);
    let log = ReplayLog::new(clock.clone());
    let auth = Arc::new(ReplayAuthFlow { log: log.clone() });
    let services = FrameSessionServices {
        port: Arc::new(ReplayFramePort { log: log.clone() }),
        capabilities: CapabilityHandlers::new(
            options.config.game.game_id.clone(),
            auth.clone(),
            Arc::new(StaticUsersDirectory {
                users: vec![json!({"id": "player-1", "name": "Player One"})],
            }),
            Arc::new(MemorySaveDataStore::default()),
        ),
        auth,
        exchange: build_token_exchange(&options)?,
        campaigns: Arc::new(ReplayCampaigns { log: log.clone() }),
    };
    let fullscreen = match options.native_fullscreen {
        CliNativeFullscreen::Allow => StaticFullscreenPlatform::allowing(),
        CliNativeFullscreen::Deny => StaticFullscreenPlatform::denying(),
    };
    let session = FrameSession::new(options.config.clone(), options.device, clock.as_clock_fn())
        .with_fullscreen_platform(Arc::new(fullscreen))
        .with_preference_store(build_preference_store(&options))
        .with_signed_in(options.signed_in);

    let mut driver = FrameSessionDriver::new(session, services);
    let mut page_events = driver.subscribe_page_events();
    driver.mount();
    drain_page_events(&mut page_events, &log);

    for entry in transcript {
        advance_to(&mut driver, &clock, &mut page_events, &log, entry.at_ms);
        tracing::debug!(at_ms = entry.at_ms, "replaying signal");
        driver.handle_signal(entry.signal);
        driver.settle_pending().await;
        drain_page_events(&mut page_events, &log);
    }
    if let Some(until_ms) = options.until_ms {
        advance_to(&mut driver, &clock, &mut page_events, &log, until_ms);
    }

    let report = driver.finish();
    drain_page_events(&mut page_events, &log);
    Ok(ReplayOutcome {
        lines: log.take_lines(),
        report,
    })
}

fn advance_to(
    driver: &mut FrameSessionDriver,
    clock: &ManualClock,
    page_events: &mut broadcast::Receiver<PageEvent>,
    log: &ReplayLog,
    target_ms: u64,
) {
    while let Some(deadline) = driver
        .next_deadline_ms()
        .filter(|deadline| *deadline <= target_ms)
    {
        clock.set(deadline.max(clock.now_ms()));
        driver.tick();
        drain_page_events(page_events, log);
    }
    if target_ms > clock.now_ms() {
        clock.set(target_ms);
    }
}

fn drain_page_events(page_events: &mut broadcast::Receiver<PageEvent>, log: &ReplayLog) {
    loop {
        match page_events.try_recv() {
            Ok(event) => match serde_json::to_value(&event) {
                Ok(body) => log.record("page_event", body),
                Err(error) => tracing::warn!(%error, "failed to encode page event"),
            },
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "replay page event listener lagged");
            }
            Err(_) => break,
        }
    }
}

pub(crate) async fn execute_replay_command(args: &ReplayArgs) -> Result<()> {
    let options = ReplayOptions::from_args(args)?;
    let transcript = load_transcript(&args.transcript)?;
    let outcome = run_replay(options, transcript).await?;
    for line in &outcome.lines {
        println!("{line}");
    }
    let report =
        serde_json::to_value(&outcome.report).context("failed to encode replay report")?;
    println!("{}", json!({ "report": report }));
    Ok(())
}

fn load_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    parse_transcript(&raw).with_context(|| format!("invalid transcript {}", path.display()))
}
