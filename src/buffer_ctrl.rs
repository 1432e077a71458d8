//! Frame storage the acquisition publishes into.

use chrono::{DateTime, Utc};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::detector::FrameDim;
use crate::error::{Result, XpadError};
use crate::frame::{ArcFrame, Frame, FrameBuffer, FrameInfo, PixelData};

/// Owner of published frames.
///
/// The acquisition worker is the only caller. A slot handed out by
/// `acquire_slot` belongs to the caller until it is passed back through
/// `publish`; dropping it instead discards the frame.
pub trait BufferManager: Send + Sync {
    fn set_start_timestamp(&self, start: DateTime<Utc>);

    /// Zeroed storage for frame `frame_nb`.
    fn acquire_slot(&self, frame_nb: usize, dim: &FrameDim) -> Result<PixelData>;

    /// Takes ownership of a filled slot and signals it ready.
    fn publish(&self, frame_nb: usize, pixels: PixelData, info: FrameInfo) -> Result<()>;
}

struct SoftInner {
    ring: FrameBuffer,
    pending: HashMap<usize, FrameDim>,
    listeners: Vec<Sender<ArcFrame>>,
    start: Option<DateTime<Utc>>,
    published: usize,
}

/// In-memory buffer manager: keeps the last `capacity` frames and forwards
/// each published frame to its subscribers.
#[derive(Clone)]
pub struct SoftBufferManager {
    inner: Arc<Mutex<SoftInner>>,
}

impl SoftBufferManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SoftInner {
                ring: FrameBuffer::new(capacity),
                pending: HashMap::new(),
                listeners: Vec::new(),
                start: None,
                published: 0,
            })),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SoftInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives every frame published from now on.
    pub fn subscribe(&self) -> Receiver<ArcFrame> {
        let (tx, rx) = unbounded();
        self.inner().listeners.push(tx);
        rx
    }

    pub fn latest(&self) -> Option<ArcFrame> {
        self.inner().ring.latest().cloned()
    }

    /// Most recent retained frame with this acquisition number.
    pub fn frame(&self, acq_frame_nb: usize) -> Option<ArcFrame> {
        self.inner().ring.get(acq_frame_nb).cloned()
    }

    /// Retained frames, oldest first.
    pub fn frames(&self) -> Vec<ArcFrame> {
        self.inner().ring.iter().cloned().collect()
    }

    /// Frames published since creation.
    pub fn published(&self) -> usize {
        self.inner().published
    }

    pub fn start_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner().start
    }

    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.ring.clear();
        inner.pending.clear();
    }
}

impl BufferManager for SoftBufferManager {
    fn set_start_timestamp(&self, start: DateTime<Utc>) {
        let mut inner = self.inner();
        inner.start = Some(start);
        inner.pending.clear();
    }

    fn acquire_slot(&self, frame_nb: usize, dim: &FrameDim) -> Result<PixelData> {
        self.inner().pending.insert(frame_nb, *dim);
        trace!("Slot for frame {} ({} bytes)", frame_nb, dim.size_in_bytes());
        Ok(PixelData::zeroed(dim.sample, dim.geometry.pixel_count()))
    }

    fn publish(&self, frame_nb: usize, pixels: PixelData, info: FrameInfo) -> Result<()> {
        let mut inner = self.inner();
        let dim = inner.pending.remove(&frame_nb).ok_or_else(|| {
            XpadError::frame_processing(format!("frame {} published without a slot", frame_nb))
        })?;
        if pixels.len() != dim.geometry.pixel_count() || pixels.sample_type() != dim.sample {
            return Err(XpadError::frame_processing(format!(
                "frame {} does not match its slot",
                frame_nb
            )));
        }

        let frame: ArcFrame = Arc::new(Frame::new(info, dim, pixels));
        inner.ring.push(Arc::clone(&frame));
        inner.published += 1;
        inner.listeners.retain(|tx| tx.send(Arc::clone(&frame)).is_ok());
        debug!("Frame {} ready", frame_nb);
        Ok(())
    }
}
