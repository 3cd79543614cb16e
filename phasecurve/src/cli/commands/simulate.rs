//! `simulate` command
//!
//! Runs an envelope to completion and renders the samples as a table,
//! CSV or a JSON document.

use std::borrow::Cow;
use std::io::Write;

use serde::Serialize;

use crate::cli::args::{SampleFormat, SimulateArgs};
use crate::cli::commands::{load_envelope, open_output, resolve_phase};
use crate::config::simulation_options;
use crate::error::PhaseCurveError;
use crate::phase::{PhaseEnvelope, PhaseId, TransitionCause};
use crate::simulate::{Simulation, SimulationEnd, SimulationOptions};

/// Simulate the configured envelope and write its samples.
///
/// # Errors
///
/// Returns a configuration error for an invalid file, a simulation error
/// when the run does not finish, or an I/O error writing the output.
pub fn run(args: &SimulateArgs) -> Result<(), PhaseCurveError> {
    let (loaded, envelope) = load_envelope(&args.config)?;

    let mut options = simulation_options(loaded.config.simulation.as_ref());
    if let Some(trigger_time) = args.trigger_time {
        options.trigger_time = trigger_time;
    }
    if let Some(dt) = args.dt {
        options = options.with_dt(dt);
    }
    if let Some(max_ticks) = args.max_ticks {
        options = options.with_max_ticks(max_ticks);
    }
    if let Some(start) = &args.start {
        options = options.with_start(resolve_phase(&envelope, start)?);
    }

    let simulation = envelope.simulate_with(&options)?;
    let mut out = open_output(args.output.as_deref())?;
    match args.format {
        SampleFormat::Human => write_human(&mut out, &envelope, &simulation)?,
        SampleFormat::Csv => write_csv(&mut out, &envelope, &simulation)?,
        SampleFormat::Json => write_json(&mut out, &envelope, &options, &simulation)?,
    }
    out.flush()?;
    Ok(())
}

fn end_label(envelope: &PhaseEnvelope, end: SimulationEnd) -> String {
    match end {
        SimulationEnd::Idle => "returned to idle".to_string(),
        SimulationEnd::Held { phase } => format!("held in {}", envelope.phase_label(Some(phase))),
    }
}

/// Summary, per-phase table and one row per sample.
pub(crate) fn write_human(
    out: &mut dyn Write,
    envelope: &PhaseEnvelope,
    simulation: &Simulation,
) -> std::io::Result<()> {
    let samples = simulation.samples.samples();
    let (lowest, highest) = simulation.samples.value_range();
    writeln!(
        out,
        "{}: {} ticks, {} samples, {}",
        envelope.name().unwrap_or("envelope"),
        simulation.ticks,
        samples.len(),
        end_label(envelope, simulation.end),
    )?;
    writeln!(
        out,
        "range {lowest} .. {highest} over {:.4}s",
        simulation.samples.total_time()
    )?;
    writeln!(out)?;

    writeln!(
        out,
        "{:<12} {:<10} {:>10} {:>10} {:>8}",
        "phase", "completion", "start", "end", "samples"
    )?;
    for segment in simulation.samples.segments() {
        let first = &samples[segment.start];
        let last = &samples[segment.end - 1];
        writeln!(
            out,
            "{:<12} {:<10} {:>10.4} {:>10.4} {:>8}",
            envelope.phase_label(Some(segment.phase)),
            envelope.phases()[segment.phase.index()].completion().kind(),
            first.total_elapsed,
            last.total_elapsed,
            segment.end - segment.start,
        )?;
    }
    writeln!(out)?;

    writeln!(out, "{:>10} {:<12} {:>10} {:>12}", "time", "phase", "phase_time", "value")?;
    for sample in samples {
        writeln!(
            out,
            "{:>10.4} {:<12} {:>10.4} {:>12.6}",
            sample.total_elapsed,
            envelope.phase_label(Some(sample.phase)),
            sample.phase_elapsed,
            sample.value,
        )?;
    }
    Ok(())
}

/// `time,phase,phase_time,value` with a header row.
pub(crate) fn write_csv(
    out: &mut dyn Write,
    envelope: &PhaseEnvelope,
    simulation: &Simulation,
) -> std::io::Result<()> {
    writeln!(out, "time,phase,phase_time,value")?;
    for sample in simulation.samples.samples() {
        writeln!(
            out,
            "{},{},{},{}",
            sample.total_elapsed,
            csv_field(envelope.phase_label(Some(sample.phase))),
            sample.phase_elapsed,
            sample.value,
        )?;
    }
    Ok(())
}

/// Quotes a CSV field when it contains a separator, quote or line break.
fn csv_field(text: &str) -> Cow<'_, str> {
    if text.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}

#[derive(Serialize)]
struct Report<'a> {
    envelope: Option<&'a str>,
    dt: f64,
    trigger_time: f64,
    ticks: usize,
    end: &'a str,
    range: [f64; 2],
    samples: Vec<SampleRow<'a>>,
    transitions: Vec<TransitionRow<'a>>,
}

#[derive(Serialize)]
struct SampleRow<'a> {
    time: f64,
    phase: &'a str,
    phase_time: f64,
    value: f64,
}

#[derive(Serialize)]
struct TransitionRow<'a> {
    time: f64,
    from: Option<&'a str>,
    to: Option<&'a str>,
    cause: &'a TransitionCause,
    value: f64,
}

pub(crate) fn write_json(
    out: &mut dyn Write,
    envelope: &PhaseEnvelope,
    options: &SimulationOptions,
    simulation: &Simulation,
) -> Result<(), PhaseCurveError> {
    let (lowest, highest) = simulation.samples.value_range();
    let end = end_label(envelope, simulation.end);
    let label = |id: PhaseId| envelope.phase_label(Some(id));
    let report = Report {
        envelope: envelope.name(),
        dt: options.dt,
        trigger_time: options.trigger_time,
        ticks: simulation.ticks,
        end: &end,
        range: [lowest, highest],
        samples: simulation
            .samples
            .samples()
            .iter()
            .map(|s| SampleRow {
                time: s.total_elapsed,
                phase: label(s.phase),
                phase_time: s.phase_elapsed,
                value: s.value,
            })
            .collect(),
        transitions: simulation
            .transitions
            .iter()
            .map(|t| TransitionRow {
                time: t.total_elapsed,
                from: t.from.map(label),
                to: t.to.map(label),
                cause: &t.cause,
                value: t.value,
            })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}
