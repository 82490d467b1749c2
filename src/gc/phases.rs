use std::time::{Duration, Instant};

/// Phases of one collection run.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum GcPhase {
    None,
    Collecting,
    Deleting,
    Sorting,
    SplitsCleanup,
}

impl GcPhase {
    fn index(self) -> usize {
        match self {
            GcPhase::None => 0,
            GcPhase::Collecting => 1,
            GcPhase::Deleting => 2,
            GcPhase::Sorting => 3,
            GcPhase::SplitsCleanup => 4,
        }
    }
}

/// Accumulating stopwatch; re-entered phases keep adding to the same
/// total.
#[derive(Debug, Default)]
struct Stopwatch {
    elapsed: Duration,
    started_at: Option<Instant>,
}

impl Stopwatch {
    fn resume(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn suspend(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.elapsed += started_at.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.elapsed + started_at.elapsed(),
            None => self.elapsed,
        }
    }
}

/// Tracks cumulative wall time per phase across a run. Phases nest as a
/// stack: starting a phase suspends the one below it, stopping resumes
/// it. A stop for a phase that is not on top is ignored.
pub(crate) struct GcPhases {
    stack: Vec<GcPhase>,
    watches: [Stopwatch; 5],
    overall: Stopwatch,
}

impl GcPhases {
    pub fn new() -> Self {
        let mut phases = Self {
            stack: Vec::new(),
            watches: Default::default(),
            overall: Stopwatch::default(),
        };
        phases.overall.resume();
        phases.watches[GcPhase::None.index()].resume();
        phases
    }

    fn current(&self) -> GcPhase {
        self.stack.last().copied().unwrap_or(GcPhase::None)
    }

    pub fn start(&mut self, phase: GcPhase) {
        self.watches[self.current().index()].suspend();
        self.stack.push(phase);
        self.watches[phase.index()].resume();
    }

    pub fn stop(&mut self, phase: GcPhase) {
        if self.stack.last() == Some(&phase) {
            self.watches[phase.index()].suspend();
            self.stack.pop();
            self.watches[self.current().index()].resume();
        }
    }

    /// Drains the stack and freezes all timers.
    pub fn close(&mut self) {
        while let Some(phase) = self.stack.pop() {
            self.watches[phase.index()].suspend();
        }
        self.watches[GcPhase::None.index()].suspend();
        self.overall.suspend();
    }

    pub fn elapsed(&self, phase: GcPhase) -> Duration {
        self.watches[phase.index()].elapsed()
    }

    pub fn overall_elapsed(&self) -> Duration {
        self.overall.elapsed()
    }

    #[cfg(test)]
    fn current_phase(&self) -> GcPhase {
        self.current()
    }
}
