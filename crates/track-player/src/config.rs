/// Playback tuning parameters shared by the session, refill, and decode stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Compressed bytes read from the file per refill (one read call).
    pub chunk_bytes: usize,
    /// Number of output buffers cycled between the refill callback and the device.
    pub buffer_count: usize,
    /// Capacity of each output buffer in bytes.
    pub buffer_bytes: usize,
    /// Capacity of the decoder's PCM scratch in 16-bit samples.
    ///
    /// `None` sizes it for the worst case of one `chunk_bytes` pass.
    pub scratch_samples: Option<usize>,
    /// Volume applied right after the output is bound (0..=100).
    pub default_volume: u8,
    /// Step used by the forward/backward seek helpers.
    pub seek_step_ms: u64,
    /// Distance kept from the end of the track when a forward step would overshoot.
    pub end_margin_ms: u64,
}

impl Default for PlayerConfig {
    /// Defaults tuned for a small double-buffered output.
    fn default() -> Self {
        Self {
            chunk_bytes: 8192,
            buffer_count: 2,
            buffer_bytes: 8192,
            scratch_samples: None,
            default_volume: 30,
            seek_step_ms: 10_000,
            end_margin_ms: 1_000,
        }
    }
}

impl PlayerConfig {
    /// Effective scratch capacity in samples.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch_samples
            .unwrap_or_else(|| crate::mp3::worst_case_samples(self.chunk_bytes))
            .max(1)
    }
}
