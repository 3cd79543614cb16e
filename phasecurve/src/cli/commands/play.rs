//! `play` command
//!
//! Drives an envelope with a fixed-step clock and a script of timed input
//! events, writing a JSONL event stream. Time is the driver's clock: it
//! keeps running while the envelope is idle so that later events can
//! re-activate it.

use std::time::Duration;

use tracing::info;

use crate::cli::args::{PlayArgs, ScheduledEvent};
use crate::cli::commands::load_envelope;
use crate::config::simulation_options;
use crate::error::{PhaseCurveError, SimulationError};
use crate::observability::{Event, EventEmitter, init_metrics};
use crate::phase::completion::approximately;
use crate::phase::{DEFAULT_TOLERANCE, PhaseEnvelope, PhaseTransition};
use crate::simulate::SimulationOptions;

/// Clock and budget for one playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaySettings {
    /// Tick length in seconds
    pub dt: f64,
    /// Stop after this many seconds; run until idle when `None`
    pub duration: Option<f64>,
    /// Tick budget when no duration is given
    pub max_ticks: usize,
    /// Sleep `dt` between ticks
    pub realtime: bool,
    /// Activate the envelope in its start phase before the first tick
    pub autostart: bool,
}

/// Why playback stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Idle with no events left to deliver
    Idle,
    /// The requested duration elapsed
    Duration,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Duration => f.write_str("duration elapsed"),
        }
    }
}

/// Outcome of a playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayReport {
    /// Ticks executed
    pub ticks: usize,
    /// Driver time at the end
    pub time: f64,
    /// Envelope value at the end
    pub value: f64,
    /// Why playback stopped
    pub reason: StopReason,
}

/// Play the configured envelope against the scripted events.
///
/// # Errors
///
/// Returns a configuration error for an invalid file, a usage error for a
/// bad step or duration, a simulation error when the envelope is still
/// active after the tick budget, and envelope errors from the run.
pub fn run(args: &PlayArgs) -> Result<(), PhaseCurveError> {
    let (loaded, mut envelope) = load_envelope(&args.config)?;
    let defaults = simulation_options(loaded.config.simulation.as_ref());
    let settings = PlaySettings {
        dt: args.dt.unwrap_or(defaults.dt),
        duration: args.duration,
        realtime: args.realtime,
        // Without a script there is nothing else to start the envelope.
        autostart: args.events.is_empty(),
        ..PlaySettings::from(&defaults)
    };

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }
    let emitter = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stdout(),
    };

    let report = play(&mut envelope, &args.events, &settings, &emitter)?;
    info!(
        ticks = report.ticks,
        time = report.time,
        value = report.value,
        events = emitter.event_count(),
        reason = %report.reason,
        "playback finished"
    );
    Ok(())
}

/// Runs the playback loop.
///
/// Each step delivers every event due at the current time, then ticks.
/// Events are delivered in time order; events with equal times keep their
/// script order.
///
/// # Errors
///
/// Returns [`PhaseCurveError::Usage`] for a bad step or duration,
/// [`SimulationError::IterationCapExceeded`] when no duration is set and the
/// envelope is still active after `max_ticks`, and envelope errors.
pub fn play(
    envelope: &mut PhaseEnvelope,
    script: &[ScheduledEvent],
    settings: &PlaySettings,
    emitter: &EventEmitter,
) -> Result<PlayReport, PhaseCurveError> {
    if !settings.dt.is_finite() || settings.dt <= 0.0 {
        return Err(PhaseCurveError::Usage(format!(
            "dt must be finite and positive, got {}",
            settings.dt
        )));
    }
    if let Some(duration) = settings.duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(PhaseCurveError::Usage(format!(
                "duration must be finite and non-negative, got {duration}"
            )));
        }
    }

    let mut script = script.to_vec();
    script.sort_by(|a, b| a.at.total_cmp(&b.at));
    let mut pending = script.iter().peekable();

    emitter.emit(&Event::PlaybackStarted {
        envelope: envelope.name().map(str::to_string),
        phases: envelope.phases().iter().map(|p| p.name().to_string()).collect(),
        dt: settings.dt,
    });
    if settings.autostart && !envelope.is_active() {
        let transitions = envelope.start()?;
        emit_transitions(emitter, envelope, &transitions, 0.0);
    }

    let mut ticks = 0_usize;
    let reason = loop {
        #[allow(clippy::cast_precision_loss)]
        let time = ticks as f64 * settings.dt;

        while let Some(event) = pending.next_if(|e| due(e.at, time)) {
            let outcome = envelope.trigger(&event.name)?;
            emitter.emit(&Event::TriggerDelivered {
                time,
                event: event.name.clone(),
                matched: !outcome.transitions().is_empty(),
            });
            emit_transitions(emitter, envelope, outcome.transitions(), time);
        }

        match settings.duration {
            Some(duration) if due(duration, time) => break StopReason::Duration,
            None if !envelope.is_active() && pending.peek().is_none() => break StopReason::Idle,
            None if ticks == settings.max_ticks => {
                return Err(SimulationError::IterationCapExceeded {
                    ticks,
                    phase: envelope.phase_label(envelope.phase()).to_string(),
                }
                .into());
            }
            _ => {}
        }

        if settings.realtime {
            std::thread::sleep(Duration::from_secs_f64(settings.dt));
        }
        let outcome = envelope.tick(settings.dt)?;
        ticks += 1;
        #[allow(clippy::cast_precision_loss)]
        let time = ticks as f64 * settings.dt;
        emit_transitions(emitter, envelope, &outcome.transitions, time);
    };

    #[allow(clippy::cast_precision_loss)]
    let time = ticks as f64 * settings.dt;
    let report = PlayReport {
        ticks,
        time,
        value: envelope.value(),
        reason,
    };
    emitter.emit(&Event::PlaybackStopped {
        time,
        ticks,
        value: report.value,
        reason: reason.to_string(),
    });
    Ok(report)
}

fn due(at: f64, now: f64) -> bool {
    at <= now || approximately(at, now, DEFAULT_TOLERANCE)
}

fn emit_transitions(
    emitter: &EventEmitter,
    envelope: &PhaseEnvelope,
    transitions: &[PhaseTransition],
    time: f64,
) {
    for transition in transitions {
        emitter.emit(&Event::phase_changed(envelope, transition, time));
    }
}

impl From<&SimulationOptions> for PlaySettings {
    fn from(options: &SimulationOptions) -> Self {
        Self {
            dt: options.dt,
            duration: None,
            max_ticks: options.max_ticks,
            realtime: false,
            autostart: false,
        }
    }
}
