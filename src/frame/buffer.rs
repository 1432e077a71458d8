use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::types::{ArcFrame, PixelData};
use crate::detector::SampleType;

/// Hands out raw acquisition buffers and counts the ones still alive.
#[derive(Debug, Clone, Default)]
pub struct RawArena {
    outstanding: Arc<AtomicUsize>,
    leased: Arc<AtomicUsize>,
}

impl RawArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self, sample: SampleType, len: usize) -> RawBuffer {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.leased.fetch_add(1, Ordering::SeqCst);
        RawBuffer {
            data: PixelData::zeroed(sample, len),
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    pub fn lease_many(&self, count: usize, sample: SampleType, len: usize) -> Vec<RawBuffer> {
        (0..count).map(|_| self.lease(sample, len)).collect()
    }

    /// Buffers leased and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Buffers leased over the arena's lifetime.
    pub fn total_leased(&self) -> usize {
        self.leased.load(Ordering::SeqCst)
    }
}

/// Raw frame storage filled by the transport. Released on drop.
#[derive(Debug)]
pub struct RawBuffer {
    data: PixelData,
    outstanding: Arc<AtomicUsize>,
}

impl Deref for RawBuffer {
    type Target = PixelData;

    fn deref(&self) -> &PixelData {
        &self.data
    }
}

impl DerefMut for RawBuffer {
    fn deref_mut(&mut self) -> &mut PixelData {
        &mut self.data
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded ring of the most recently published frames.
pub struct FrameBuffer {
    buffer: VecDeque<ArcFrame>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame: ArcFrame) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArcFrame> {
        self.buffer.iter()
    }

    /// Most recent frame published with this acquisition number.
    pub fn get(&self, acq_frame_nb: usize) -> Option<&ArcFrame> {
        self.buffer
            .iter()
            .rev()
            .find(|frame| frame.info.acq_frame_nb == acq_frame_nb)
    }

    pub fn latest(&self) -> Option<&ArcFrame> {
        self.buffer.back()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{FrameDim, ImageGeometry};
    use crate::frame::types::{Frame, FrameInfo};

    fn frame(nb: usize) -> ArcFrame {
        let dim = FrameDim::new(ImageGeometry::new(4, 2), SampleType::U16);
        Arc::new(Frame::new(
            FrameInfo::new(nb),
            dim,
            PixelData::zeroed(SampleType::U16, 8),
        ))
    }

    #[test]
    fn test_arena_counts_drops() {
        let arena = RawArena::new();
        let buffers = arena.lease_many(5, SampleType::U16, 16);
        assert_eq!(arena.outstanding(), 5);
        drop(buffers);
        assert_eq!(arena.outstanding(), 0);
        assert_eq!(arena.total_leased(), 5);
    }

    #[test]
    fn test_raw_buffer_derefs_to_pixels() {
        let arena = RawArena::new();
        let mut raw = arena.lease(SampleType::U32, 3);
        if let PixelData::U32(v) = &mut *raw {
            v[1] = 7;
        }
        assert_eq!(raw.total_counts(), 7);
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut ring = FrameBuffer::new(3);
        for nb in 0..5 {
            ring.push(frame(nb));
        }
        assert_eq!(ring.len(), 3);
        assert!(ring.get(1).is_none());
        assert_eq!(ring.get(2).unwrap().info.acq_frame_nb, 2);
        assert_eq!(ring.latest().unwrap().info.acq_frame_nb, 4);
    }
}
