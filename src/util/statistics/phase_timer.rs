use std::time::{Duration, Instant};

/// Times the phases of one collection. Phases are started and stopped in order; starting a
/// phase stops the previous one.
#[derive(Default)]
pub struct PhaseTimer {
    current: Option<(&'static str, Instant)>,
    finished: Vec<(&'static str, Duration)>,
}

impl PhaseTimer {
    pub fn start_phase(&mut self, name: &'static str) {
        self.stop_phase();
        debug!("Phase {} start", name);
        self.current = Some((name, Instant::now()));
    }

    pub fn stop_phase(&mut self) {
        if let Some((name, start)) = self.current.take() {
            let elapsed = start.elapsed();
            debug!("Phase {} end ({:?})", name, elapsed);
            self.finished.push((name, elapsed));
        }
    }

    /// Stop the running phase and return the recorded timings.
    pub fn finish(&mut self) -> Vec<(&'static str, Duration)> {
        self.stop_phase();
        std::mem::take(&mut self.finished)
    }
}
