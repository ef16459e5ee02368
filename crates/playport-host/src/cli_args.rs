use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use playport_session::{DeviceClass, PaymentProvider};

fn parse_virtual_ms(value: &str) -> Result<u64, String> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|error| format!("failed to parse milliseconds: {error}"))
}

fn parse_payment_provider(value: &str) -> Result<PaymentProvider, String> {
    PaymentProvider::parse(value).ok_or_else(|| format!("unknown payment provider '{value}'"))
}

#[derive(Debug, Parser)]
#[command(
    name = "playport-host",
    about = "Host-side driver for embedded game frame sessions",
    version
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: HostCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum HostCommand {
    /// Replay a timed NDJSON signal transcript against a mounted session.
    Replay(ReplayArgs),
    /// Validate a session config and print it with defaults resolved.
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliDeviceClass {
    Mobile,
    Desktop,
}

impl From<CliDeviceClass> for DeviceClass {
    fn from(value: CliDeviceClass) -> Self {
        match value {
            CliDeviceClass::Mobile => DeviceClass::Mobile,
            CliDeviceClass::Desktop => DeviceClass::Desktop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliNativeFullscreen {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct ReplayArgs {
    #[arg(
        long,
        env = "PLAYPORT_CONFIG",
        help = "Session config TOML ([timings], [game], [payment])"
    )]
    pub(crate) config: PathBuf,

    #[arg(
        long,
        help = "NDJSON transcript; one {\"at_ms\": <u64>, \"signal\": {...}} object per line"
    )]
    pub(crate) transcript: PathBuf,

    #[arg(long, value_enum, default_value = "desktop")]
    pub(crate) device: CliDeviceClass,

    #[arg(
        long = "progressive-app",
        default_value_t = false,
        help = "Treat the page as launched in progressive-app mode"
    )]
    pub(crate) progressive_app: bool,

    #[arg(
        long = "signed-in",
        default_value_t = false,
        help = "Start the session with a signed-in user"
    )]
    pub(crate) signed_in: bool,

    #[arg(
        long = "native-fullscreen",
        value_enum,
        default_value = "allow",
        help = "Whether the simulated platform grants native fullscreen requests"
    )]
    pub(crate) native_fullscreen: CliNativeFullscreen,

    #[arg(
        long = "until-ms",
        value_parser = parse_virtual_ms,
        help = "Keep releasing timers until this virtual time after the last transcript line"
    )]
    pub(crate) until_ms: Option<u64>,

    #[arg(
        long = "fail-provider",
        value_delimiter = ',',
        value_parser = parse_payment_provider,
        help = "Providers the loopback token exchange rejects (used when payment.exchange_url is unset)"
    )]
    pub(crate) fail_provider: Vec<PaymentProvider>,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct CheckConfigArgs {
    #[arg(long, env = "PLAYPORT_CONFIG")]
    pub(crate) config: PathBuf,
}
