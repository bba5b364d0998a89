//! Frame sources feeding a capture session.
//!
//! A source is whatever sits behind the display-refresh callback: a live
//! camera handle owned by the embedder, or an uploaded clip decoded into
//! memory. The session asks it for the raster visible at a timestamp.

use std::io::Cursor;
use std::path::Path;

use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_common::TimestampNs;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};

/// Trait for anything that can produce the current raster.
pub trait FrameSource: Send {
    /// The raster visible at `at_ns` since capture start.
    fn grab(&mut self, at_ns: TimestampNs) -> CinemagraphResult<RgbaImage>;

    /// Width and height of every raster this source produces.
    fn dimensions(&self) -> (u32, u32);

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Cycles through an in-memory list of rasters, one per grab.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    frames: Vec<RgbaImage>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, frames: Vec<RgbaImage>) -> CinemagraphResult<Self> {
        let Some(first) = frames.first() else {
            return Err(CinemagraphError::capture("Memory source has no frames"));
        };
        let dims = first.dimensions();
        if frames.iter().any(|f| f.dimensions() != dims) {
            return Err(CinemagraphError::capture(
                "Memory source frames differ in size",
            ));
        }
        Ok(Self {
            name: name.into(),
            frames,
            cursor: 0,
        })
    }
}

impl FrameSource for MemorySource {
    fn grab(&mut self, _at_ns: TimestampNs) -> CinemagraphResult<RgbaImage> {
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapts a closure into a source. Useful for embedders that already hold
/// a camera handle.
pub struct FnSource<F> {
    name: String,
    dimensions: (u32, u32),
    grab: F,
}

impl<F> FnSource<F>
where
    F: FnMut(TimestampNs) -> CinemagraphResult<RgbaImage> + Send,
{
    pub fn new(name: impl Into<String>, dimensions: (u32, u32), grab: F) -> Self {
        Self {
            name: name.into(),
            dimensions,
            grab,
        }
    }
}

impl<F> FrameSource for FnSource<F>
where
    F: FnMut(TimestampNs) -> CinemagraphResult<RgbaImage> + Send,
{
    fn grab(&mut self, at_ns: TimestampNs) -> CinemagraphResult<RgbaImage> {
        (self.grab)(at_ns)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Plays an uploaded animated GIF in real time, looping.
#[derive(Debug, Clone)]
pub struct GifFileSource {
    name: String,
    frames: Vec<RgbaImage>,
    /// End time of each frame within one loop, in nanoseconds.
    ends_ns: Vec<u64>,
}

/// Delay used for GIF frames that declare none.
const DEFAULT_GIF_DELAY_NS: u64 = 100_000_000;

impl GifFileSource {
    pub fn from_path(path: impl AsRef<Path>) -> CinemagraphResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CinemagraphError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gif".to_string());
        Self::from_bytes(name, &bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> CinemagraphResult<Self> {
        let name = name.into();
        let decoder = GifDecoder::new(Cursor::new(bytes))
            .map_err(|e| CinemagraphError::unsupported(format!("{name}: not a GIF: {e}")))?;
        let decoded = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| CinemagraphError::capture(format!("{name}: failed to decode: {e}")))?;
        if decoded.is_empty() {
            return Err(CinemagraphError::capture(format!("{name}: no frames")));
        }

        let mut frames = Vec::with_capacity(decoded.len());
        let mut ends_ns = Vec::with_capacity(decoded.len());
        let mut elapsed_ns = 0u64;
        for frame in decoded {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay_ns = if numer == 0 || denom == 0 {
                DEFAULT_GIF_DELAY_NS
            } else {
                (numer as u64 * 1_000_000) / denom as u64
            };
            elapsed_ns += delay_ns.max(1);
            ends_ns.push(elapsed_ns);
            frames.push(frame.into_buffer());
        }

        tracing::debug!(
            source = %name,
            frames = frames.len(),
            loop_ms = elapsed_ns / 1_000_000,
            "Decoded GIF source"
        );

        Ok(Self {
            name,
            frames,
            ends_ns,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Length of one loop in nanoseconds.
    pub fn loop_ns(&self) -> u64 {
        self.ends_ns.last().copied().unwrap_or(0)
    }

    fn index_at(&self, at_ns: TimestampNs) -> usize {
        let t = at_ns % self.loop_ns().max(1);
        self.ends_ns
            .partition_point(|&end| end <= t)
            .min(self.frames.len() - 1)
    }
}

impl FrameSource for GifFileSource {
    fn grab(&mut self, at_ns: TimestampNs) -> CinemagraphResult<RgbaImage> {
        Ok(self.frames[self.index_at(at_ns)].clone())
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
