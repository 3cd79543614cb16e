//! CLI argument definitions
//!
//! All Clap derive structs for `phasecurve` command-line parsing.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Formula-driven phase envelopes: simulate, play and validate.
#[derive(Parser, Debug)]
#[command(name = "phasecurve", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "PHASECURVE_COLOR")]
    pub color: ColorChoice,

    /// Log line format on stderr.
    #[arg(long, default_value = "human", global = true, env = "PHASECURVE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an envelope to completion and print its samples.
    Simulate(SimulateArgs),

    /// Drive an envelope tick by tick with scripted input events.
    Play(PlayArgs),

    /// Validate configuration files.
    Validate(ValidateArgs),

    /// Evaluate a formula at one or more parameter values.
    Eval(EvalArgs),

    /// Print a built-in envelope configuration as YAML.
    Preset(PresetCommand),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version and build information.
    Version(VersionArgs),
}

// ============================================================================
// Simulate / Play
// ============================================================================

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to the envelope configuration (YAML or JSON).
    #[arg(env = "PHASECURVE_CONFIG")]
    pub config: PathBuf,

    /// Seconds an external phase is held before it is released.
    #[arg(short, long)]
    pub trigger_time: Option<f64>,

    /// Tick length in seconds.
    #[arg(long)]
    pub dt: Option<f64>,

    /// Tick budget before the run is declared stuck.
    #[arg(long)]
    pub max_ticks: Option<usize>,

    /// Phase to start in instead of the configured start phase.
    #[arg(long)]
    pub start: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: SampleFormat,

    /// Write samples to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `play`.
#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Path to the envelope configuration (YAML or JSON).
    #[arg(env = "PHASECURVE_CONFIG")]
    pub config: PathBuf,

    /// Input event to deliver, as `NAME@SECONDS` (repeatable).
    #[arg(short, long = "event", value_name = "NAME@SECONDS")]
    pub events: Vec<ScheduledEvent>,

    /// Stop after this many simulated seconds even if still active.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Tick length in seconds.
    #[arg(long)]
    pub dt: Option<f64>,

    /// Sleep `dt` between ticks.
    #[arg(long)]
    pub realtime: bool,

    /// Write the JSONL event stream to a file instead of stdout.
    #[arg(long, env = "PHASECURVE_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "PHASECURVE_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// An input event scheduled at a simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    /// Event name
    pub name: String,
    /// Delivery time in seconds
    pub at: f64,
}

impl FromStr for ScheduledEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, at) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("expected NAME@SECONDS, got '{s}'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing event name in '{s}'"));
        }
        let at: f64 = at
            .trim()
            .parse()
            .map_err(|_| format!("invalid time '{at}' in '{s}'"))?;
        if !at.is_finite() || at < 0.0 {
            return Err(format!("event time must be finite and non-negative, got {at}"));
        }
        Ok(Self {
            name: name.to_string(),
            at,
        })
    }
}

// ============================================================================
// Validate / Eval
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `eval`.
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Formula to evaluate.
    pub formula: String,

    /// Name of the bound parameter.
    #[arg(short, long, default_value = "X")]
    pub parameter: String,

    /// Named variable, as `NAME=VALUE` (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<Assignment>,

    /// Parameter value to evaluate at (repeatable; defaults to 0).
    #[arg(long = "at", value_name = "X", allow_negative_numbers = true)]
    pub at: Vec<f64>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// A `NAME=VALUE` variable assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Variable name
    pub name: String,
    /// Assigned value
    pub value: f64,
}

impl FromStr for Assignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
        let value = value
            .trim()
            .parse()
            .map_err(|_| format!("invalid value '{value}' for '{name}'"))?;
        Ok(Self {
            name: name.trim().to_string(),
            value,
        })
    }
}

// ============================================================================
// Preset
// ============================================================================

/// Preset commands.
#[derive(Args, Debug)]
pub struct PresetCommand {
    /// Preset to print.
    #[command(subcommand)]
    pub preset: Preset,
}

/// Built-in presets.
#[derive(Subcommand, Debug)]
pub enum Preset {
    /// Attack, decay, sustain, release.
    Adsr(AdsrArgs),
}

/// Arguments for `preset adsr`.
#[derive(Args, Debug)]
#[allow(clippy::struct_field_names)]
pub struct AdsrArgs {
    /// Idle value and release target.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub default_value: f64,

    /// Peak reached by the attack phase.
    #[arg(long, default_value_t = 10.0, allow_negative_numbers = true)]
    pub attack_target: f64,

    /// Level held by the sustain phase.
    #[arg(long, default_value_t = 4.0, allow_negative_numbers = true)]
    pub sustain_target: f64,

    /// Attack formula.
    #[arg(long, default_value = "10*X", allow_hyphen_values = true)]
    pub attack: String,

    /// Decay formula.
    #[arg(long, default_value = "-2*X", allow_hyphen_values = true)]
    pub decay: String,

    /// Sustain formula (empty holds the level).
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub sustain: String,

    /// Release formula.
    #[arg(long, default_value = "-1*X", allow_hyphen_values = true)]
    pub release: String,

    /// Envelope name.
    #[arg(long, default_value = "adsr")]
    pub name: String,
}

// ============================================================================
// Completions / Version
// ============================================================================

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Output format for simulation samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SampleFormat {
    /// Aligned table with a phase summary.
    #[default]
    Human,
    /// One JSON document with samples and transitions.
    Json,
    /// `time,phase,phase_time,value` rows with a header.
    Csv,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================
