//! Structured event stream for envelope playback.
//!
//! Discrete, typed events emitted by the `play` driver. Events are written
//! as newline-delimited JSON (JSONL); each line carries a monotonically
//! increasing sequence number and a wall-clock timestamp next to the
//! simulated time, so recordings can be replayed or diffed.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::formula::FormulaEvaluator;
use crate::phase::{PhaseEnvelope, PhaseId, PhaseTransition, TransitionCause};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete playback event.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on the
/// event kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Playback began.
    PlaybackStarted {
        /// Envelope name, if configured
        envelope: Option<String>,
        /// Phase names in order
        phases: Vec<String>,
        /// Tick length in seconds
        dt: f64,
    },

    /// The envelope changed phase.
    PhaseChanged {
        /// Simulated time of the change
        time: f64,
        /// Phase left (`None` from idle)
        from: Option<String>,
        /// Phase entered (`None` to idle)
        to: Option<String>,
        /// Why the change happened
        cause: TransitionCause,
        /// Envelope value at the change
        value: f64,
    },

    /// A scripted input event was delivered.
    TriggerDelivered {
        /// Simulated time of delivery
        time: f64,
        /// Event name
        event: String,
        /// Whether any binding matched
        matched: bool,
    },

    /// Playback ended.
    PlaybackStopped {
        /// Simulated time at the end
        time: f64,
        /// Ticks executed
        ticks: usize,
        /// Value at the end
        value: f64,
        /// Human-readable stop reason
        reason: String,
    },
}

impl Event {
    /// A [`Event::PhaseChanged`] for `transition`, naming phases via `envelope`.
    #[must_use]
    pub fn phase_changed<E: FormulaEvaluator>(
        envelope: &PhaseEnvelope<E>,
        transition: &PhaseTransition,
        time: f64,
    ) -> Self {
        let name = |id: PhaseId| envelope.phases().get(id.index()).map(|p| p.name().to_string());
        Self::PhaseChanged {
            time,
            from: transition.from.and_then(name),
            to: transition.to.and_then(name),
            cause: transition.cause.clone(),
            value: transition.value,
        }
    }
}

// ---------------------------------------------------------------------------
// Record (adds sequence number and timestamp via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    sequence: u64,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Buffered JSONL event writer.
///
/// Serialization and I/O failures are dropped: a broken event sink never
/// stops playback.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn sink() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`, truncating it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes `event` as one JSONL line stamped with the current time.
    pub fn emit(&self, event: &Event) {
        self.emit_at(event, Utc::now());
    }

    /// Writes `event` with an explicit timestamp.
    pub fn emit_at(&self, event: &Event, timestamp: DateTime<Utc>) {
        let record = EventRecord {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp,
            event,
        };
        if let (Ok(mut w), Ok(line)) = (self.writer.lock(), serde_json::to_string(&record)) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
