/// Per-run counters, owned by the session and handed to each step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Frames successfully read since the loop started, 1-based once running.
    pub frame_index: u64,
    /// Failed reads since the last good frame.
    pub consecutive_failures: u32,
    pub objects_in_frame: usize,
    pub snapshots_saved: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self) -> u64 {
        self.consecutive_failures = 0;
        self.frame_index += 1;
        self.frame_index
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }
}
