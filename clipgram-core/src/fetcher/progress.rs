use std::time::{Duration, Instant};

use regex::Regex;

/// Downloader phases surfaced to the job record and the chat progress
/// message. Post-processing covers remux/extract steps after the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    PostProcessing,
}

/// One classified output line. Both the structured template format and the
/// bracketed human-readable fallback are recognized; everything else is
/// explicitly unrecognized rather than guessed at.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Structured {
        phase: Phase,
        percent: f64,
        speed: Option<String>,
    },
    Fallback {
        percent: f64,
        speed: Option<String>,
    },
    PhaseChange(Phase),
    Unrecognized,
}

/// Throttled, deduplicated progress notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub percent: Option<f64>,
    pub speed: Option<String>,
}

/// Rate-limiter for progress notifications. The first check always passes.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    pub fn should_emit(&mut self) -> bool {
        self.should_emit_at(Instant::now())
    }

    fn should_emit_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Force the next check to pass.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

/// Parses interleaved downloader output lines into throttled progress
/// updates. Both stdout and stderr feed the same tracker; only the
/// last-write-wins percent matters across the two streams.
pub struct ProgressTracker {
    structured: Regex,
    fallback: Regex,
    throttle: ProgressThrottle,
    phase: Phase,
}

impl ProgressTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            structured: Regex::new(r"^dl\|(downloading|postprocess)\|\s*([0-9.]+)%\|\s*(.*)$")
                .expect("static regex"),
            fallback: Regex::new(r"^\[download\]\s+([0-9.]+)%(?:.*?\bat\s+(\S+))?")
                .expect("static regex"),
            throttle: ProgressThrottle::new(min_interval),
            phase: Phase::Downloading,
        }
    }

    /// The structured template format takes precedence over the bracketed
    /// fallback when both could match.
    pub fn classify(&self, line: &str) -> LineEvent {
        if let Some(captures) = self.structured.captures(line) {
            let phase = match &captures[1] {
                "postprocess" => Phase::PostProcessing,
                _ => Phase::Downloading,
            };
            let percent = captures[2].parse().unwrap_or(0.0);
            let speed = captures
                .get(3)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty() && *s != "-")
                .map(str::to_string);
            return LineEvent::Structured {
                phase,
                percent,
                speed,
            };
        }
        if let Some(captures) = self.fallback.captures(line) {
            let percent = captures[1].parse().unwrap_or(0.0);
            let speed = captures.get(2).map(|m| m.as_str().to_string());
            return LineEvent::Fallback { percent, speed };
        }
        if line.starts_with("[Merger]")
            || line.starts_with("[ExtractAudio]")
            || line.starts_with("[Fixup")
            || line.starts_with("[ffmpeg]")
        {
            return LineEvent::PhaseChange(Phase::PostProcessing);
        }
        LineEvent::Unrecognized
    }

    /// Feed one output line. Returns a notification when the line carries
    /// progress and the throttle admits it; a transition into
    /// post-processing bypasses the throttle entirely.
    pub fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        match self.classify(line) {
            LineEvent::Structured {
                phase,
                percent,
                speed,
            } => self.admit(phase, Some(percent), speed),
            LineEvent::Fallback { percent, speed } => self.admit(self.phase, Some(percent), speed),
            LineEvent::PhaseChange(phase) => self.admit(phase, None, None),
            LineEvent::Unrecognized => None,
        }
    }

    fn admit(
        &mut self,
        phase: Phase,
        percent: Option<f64>,
        speed: Option<String>,
    ) -> Option<ProgressUpdate> {
        if phase == Phase::PostProcessing && self.phase != Phase::PostProcessing {
            self.throttle.reset();
        }
        self.phase = phase;
        if self.throttle.should_emit() {
            Some(ProgressUpdate {
                phase,
                percent,
                speed,
            })
        } else {
            None
        }
    }
}
