//! The audio pool: interleaved clips shared by regions, functions and the
//! exporter.

/// Identifier for a clip in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(pub(crate) u32);

impl PoolId {
    /// Returns the raw index of this clip.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// An immutable audio clip, stored interleaved.
#[derive(Clone, Debug)]
pub struct AudioClip {
    name: String,
    channels: u16,
    sample_rate: u32,
    frames: Vec<f32>,
}

impl AudioClip {
    /// Creates a clip from interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is zero or the sample count is not a multiple of
    /// the channel count.
    pub fn new(
        name: impl Into<String>,
        channels: u16,
        sample_rate: u32,
        frames: Vec<f32>,
    ) -> Self {
        assert!(channels > 0, "clip must have at least one channel");
        assert_eq!(
            frames.len() % channels as usize,
            0,
            "interleaved length must be a multiple of the channel count"
        );
        Self {
            name: name.into(),
            channels,
            sample_rate,
            frames,
        }
    }

    /// Builds a stereo clip from two equal-length channel buffers.
    ///
    /// # Panics
    ///
    /// Panics if the channels differ in length.
    pub fn from_stereo(
        name: impl Into<String>,
        sample_rate: u32,
        left: &[f32],
        right: &[f32],
    ) -> Self {
        assert_eq!(left.len(), right.len());
        let mut frames = Vec::with_capacity(left.len() * 2);
        for (l, r) in left.iter().zip(right.iter()) {
            frames.push(*l);
            frames.push(*r);
        }
        Self::new(name, 2, sample_rate, frames)
    }

    /// Clip name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate the clip was recorded or rendered at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames.
    pub fn num_frames(&self) -> usize {
        self.frames.len() / self.channels as usize
    }

    /// Interleaved sample data.
    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    /// Sample at `frame` in `channel`.
    ///
    /// # Panics
    ///
    /// Panics if the position is out of bounds.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.frames[frame * self.channels as usize + channel]
    }

    /// Whether every sample is below `epsilon` in magnitude.
    pub fn is_silent(&self, epsilon: f32) -> bool {
        self.frames.iter().all(|s| s.abs() <= epsilon)
    }

    /// Peak absolute sample value.
    pub fn peak(&self) -> f32 {
        self.frames.iter().fold(0.0, |acc, s| acc.max(s.abs()))
    }
}

struct PoolEntry {
    clip: AudioClip,
    written: bool,
}

/// Registry of audio clips.
///
/// Clips are append-only; edits produce new clips rather than mutating in
/// place, so anything holding a [`PoolId`] keeps seeing stable data.
#[derive(Default)]
pub struct Pool {
    entries: Vec<PoolEntry>,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clip and returns its id.
    pub fn add_clip(&mut self, clip: AudioClip) -> PoolId {
        let id = PoolId(self.entries.len() as u32);
        tracing::debug!(
            id = id.0,
            name = clip.name(),
            frames = clip.num_frames(),
            "clip added to pool"
        );
        self.entries.push(PoolEntry {
            clip,
            written: false,
        });
        id
    }

    /// Looks up a clip.
    pub fn get(&self, id: PoolId) -> Option<&AudioClip> {
        self.entries.get(id.0 as usize).map(|e| &e.clip)
    }

    /// Marks a clip as persisted. Returns `true` the first time for a given
    /// clip, `false` on repeats or unknown ids, so backing storage is
    /// written at most once per clip.
    pub fn write_to_pool(&mut self, id: PoolId) -> bool {
        match self.entries.get_mut(id.0 as usize) {
            Some(entry) if !entry.written => {
                entry.written = true;
                true
            }
            _ => false,
        }
    }

    /// Number of clips in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no clips.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
