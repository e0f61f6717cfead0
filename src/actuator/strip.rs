//! Pixel output and exclusive leases on it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// A fault raised by a renderer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderFault {
    #[error("strip lease was revoked")]
    Revoked,
    #[error("pixel output failed: {0}")]
    Output(String),
    #[error("renderer panicked: {0}")]
    Panicked(String),
}

/// 24-bit RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// One third of each channel
    pub fn dim(self) -> Self {
        Self::rgb(self.r / 3, self.g / 3, self.b / 3)
    }

    /// Fade towards black; `t` of 0.0 is full colour, 1.0 or more is off
    pub fn fade(self, t: f32) -> Self {
        let keep = (1.0 - t).clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * keep) as u8;
        Self::rgb(scale(self.r), scale(self.g), scale(self.b))
    }

    pub fn is_black(&self) -> bool {
        *self == Self::BLACK
    }
}

/// Colour wheel: red through green through blue and back over 0..=255
pub fn wheel(pos: u8) -> Color {
    match pos {
        0..=84 => Color::rgb(pos * 3, 255 - pos * 3, 0),
        85..=169 => {
            let pos = pos - 85;
            Color::rgb(255 - pos * 3, 0, pos * 3)
        }
        _ => {
            let pos = pos - 170;
            Color::rgb(0, pos * 3, 255 - pos * 3)
        }
    }
}

/// Physical (or simulated) pixel output
pub trait PixelSink: Send + Sync {
    /// Number of addressable pixels
    fn len(&self) -> usize;

    /// Latch a full frame onto the output
    fn show(&self, frame: &[Color]) -> Result<(), RenderFault>;
}

/// Sink that logs frames instead of driving hardware
pub struct ConsoleSink {
    pixels: usize,
}

impl ConsoleSink {
    pub fn new(pixels: usize) -> Self {
        Self { pixels }
    }
}

impl PixelSink for ConsoleSink {
    fn len(&self) -> usize {
        self.pixels
    }

    fn show(&self, frame: &[Color]) -> Result<(), RenderFault> {
        let lit = frame.iter().filter(|c| !c.is_black()).count();
        trace!(
            "[STRIP] frame: {} lit of {}, head {:?}",
            lit,
            frame.len(),
            frame.first()
        );
        Ok(())
    }
}

/// Owner of the pixel output. Hands out one valid lease at a time.
pub struct Strip {
    sink: Arc<dyn PixelSink>,
    generation: Arc<AtomicU64>,
}

impl Strip {
    pub fn new(sink: Arc<dyn PixelSink>) -> Self {
        Self {
            sink,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Issue a new lease, revoking every earlier one
    pub fn lease(&self) -> StripLease {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        StripLease {
            sink: self.sink.clone(),
            current: self.generation.clone(),
            generation,
        }
    }

    /// Revoke whatever lease is outstanding
    pub fn revoke(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Permission for one renderer to drive the output
#[derive(Clone)]
pub struct StripLease {
    sink: Arc<dyn PixelSink>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl StripLease {
    pub fn len(&self) -> usize {
        self.sink.len()
    }

    pub fn is_valid(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn show(&self, frame: &[Color]) -> Result<(), RenderFault> {
        if !self.is_valid() {
            return Err(RenderFault::Revoked);
        }
        self.sink.show(frame)
    }
}
