//! Byte-budgeted frame ring buffer
//!
//! Frames are stored JPEG-compressed, oldest first. The total compressed size
//! never exceeds `max_bytes`; room is made by evicting from the oldest end
//! only. Each stored frame carries a sequence number that keeps increasing
//! across evictions and clears, so readers can ask for "everything after the
//! frame I last saw" even when the buffer is full and its length is constant.
//!
//! Compression and decompression run outside the lock; the lock only covers
//! the deque and the size accounting.

use crate::capture::traits::Frame;
use image::codecs::jpeg::JpegEncoder;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Frame buffer errors
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Compressed frame of {size} bytes exceeds the {max} byte budget")]
    FrameTooLarge { size: usize, max: usize },
}

/// A compressed frame and its position in the capture sequence.
///
/// Cheap to clone; the JPEG bytes are shared with the buffer.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    seq: u64,
    jpeg: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Compressed size in bytes
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    pub fn decode(&self) -> Result<Frame, BufferError> {
        decode_jpeg(&self.jpeg)
    }
}

#[derive(Debug, Default)]
struct Inner {
    frames: VecDeque<EncodedFrame>,
    current_size: usize,
    next_seq: u64,
}

/// Bounded, thread-safe store of compressed frames
#[derive(Debug)]
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    max_bytes: usize,
    quality: u8,
}

impl FrameBuffer {
    /// Create a buffer holding at most `max_bytes` of JPEG data at `quality` (1-100)
    pub fn new(max_bytes: usize, quality: u8) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_seq: 1,
                ..Inner::default()
            }),
            max_bytes,
            quality: quality.clamp(1, 100),
        }
    }

    /// Compress and append a frame, evicting the oldest frames to stay in budget.
    ///
    /// Returns the sequence number given to the frame. On error the frame is
    /// dropped and the buffer is unchanged.
    pub fn add_frame(&self, frame: &Frame) -> Result<u64, BufferError> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        let size = jpeg.len();
        if size > self.max_bytes {
            return Err(BufferError::FrameTooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let mut inner = self.inner.lock();
        while inner.current_size + size > self.max_bytes {
            match inner.frames.pop_front() {
                Some(old) => inner.current_size -= old.jpeg.len(),
                None => break,
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.current_size += size;
        inner.frames.push_back(EncodedFrame {
            seq,
            jpeg: Arc::from(jpeg),
        });
        Ok(seq)
    }

    /// The last `count` frames (all when `None`), oldest first, decoded.
    ///
    /// Asking for more frames than are stored returns what there is.
    pub fn get_frames(&self, count: Option<usize>) -> Result<Vec<Frame>, BufferError> {
        let (selected, _) = self.snapshot(count);
        selected.iter().map(EncodedFrame::decode).collect()
    }

    /// The last `count` compressed frames (all when `None`), oldest first,
    /// and the sequence number of the newest stored frame (0 when empty).
    ///
    /// Both are taken under one lock, so frames with a higher sequence
    /// number were appended after the snapshot.
    pub fn snapshot(&self, count: Option<usize>) -> (Vec<EncodedFrame>, u64) {
        let inner = self.inner.lock();
        let len = inner.frames.len();
        let skip = count.map_or(0, |n| len.saturating_sub(n));
        let selected = inner.frames.iter().skip(skip).cloned().collect();
        (selected, inner.frames.back().map_or(0, |f| f.seq))
    }

    /// Up to `limit` compressed frames appended after sequence number
    /// `after`, oldest first.
    ///
    /// Frames evicted before they could be read are skipped.
    pub fn frames_since(&self, after: u64, limit: usize) -> Vec<EncodedFrame> {
        let inner = self.inner.lock();
        // Sequence numbers are contiguous from front to back
        let start = inner
            .frames
            .front()
            .map_or(0, |f| (after + 1).saturating_sub(f.seq) as usize);
        inner.frames.iter().skip(start).take(limit).cloned().collect()
    }

    /// Most recent frame, decoded
    pub fn latest_frame(&self) -> Option<Frame> {
        let newest = self.inner.lock().frames.back().cloned()?;
        match decode_jpeg(&newest.jpeg) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("Failed to decode latest frame: {}", e);
                None
            }
        }
    }

    /// Sequence number of the newest stored frame, 0 when empty
    pub fn latest_sequence(&self) -> u64 {
        self.inner.lock().frames.back().map_or(0, |f| f.seq)
    }

    /// Remove all frames. Sequence numbers keep counting up.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.current_size = 0;
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Total compressed bytes held
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, BufferError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(frame)
        .map_err(|e| BufferError::Encoding(e.to_string()))?;
    Ok(jpeg)
}

fn decode_jpeg(data: &[u8]) -> Result<Frame, BufferError> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| BufferError::Decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::thread;

    /// Flat gray frame whose brightness identifies it
    fn marked_frame(id: u8) -> Frame {
        Frame::from_pixel(32, 24, Rgb([id, id, id]))
    }

    fn mark_of(frame: &Frame) -> u8 {
        frame.get_pixel(3, 3)[0]
    }

    fn encoded_size(frame: &Frame) -> usize {
        encode_jpeg(frame, 90).unwrap().len()
    }

    #[test]
    fn test_round_trip_keeps_dimensions() {
        let buffer = FrameBuffer::new(1 << 20, 90);
        let frame = Frame::from_pixel(64, 48, Rgb([200, 10, 10]));
        buffer.add_frame(&frame).unwrap();

        let frames = buffer.get_frames(Some(1)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dimensions(), (64, 48));
    }

    #[test]
    fn test_size_budget_holds_after_every_add() {
        let one = encoded_size(&marked_frame(0));
        let buffer = FrameBuffer::new(one * 5 + one / 2, 90);

        for id in 0..40u8 {
            buffer.add_frame(&marked_frame(id * 6)).unwrap();
            assert!(buffer.size_bytes() <= buffer.max_bytes());
        }
        assert!(buffer.frame_count() >= 4);
        assert!(buffer.frame_count() <= 6);
    }

    #[test]
    fn test_eviction_keeps_contiguous_suffix() {
        let one = encoded_size(&marked_frame(0));
        let buffer = FrameBuffer::new(one * 4, 90);

        let ids: Vec<u8> = (0..12).map(|i| i * 20).collect();
        for &id in &ids {
            buffer.add_frame(&marked_frame(id)).unwrap();
        }

        let stored: Vec<u8> = buffer
            .get_frames(None)
            .unwrap()
            .iter()
            .map(mark_of)
            .collect();
        assert!(!stored.is_empty());

        // JPEG is lossy, so compare by nearest expected id
        let expected = &ids[ids.len() - stored.len()..];
        for (got, want) in stored.iter().zip(expected) {
            assert!((*got as i16 - *want as i16).abs() <= 3, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_get_frames_window_is_tail_of_all() {
        let buffer = FrameBuffer::new(1 << 20, 90);
        for id in 0..6u8 {
            buffer.add_frame(&marked_frame(id * 40)).unwrap();
        }

        let all: Vec<u8> = buffer.get_frames(None).unwrap().iter().map(mark_of).collect();
        let last3: Vec<u8> = buffer.get_frames(Some(3)).unwrap().iter().map(mark_of).collect();
        assert_eq!(&all[3..], &last3[..]);

        let too_many = buffer.get_frames(Some(100)).unwrap();
        assert_eq!(too_many.len(), 6);
    }

    #[test]
    fn test_oversize_frame_is_rejected_without_side_effects() {
        let small = Frame::from_pixel(8, 8, Rgb([1, 2, 3]));
        let buffer = FrameBuffer::new(encoded_size(&small) * 2, 90);
        buffer.add_frame(&small).unwrap();
        let before = buffer.size_bytes();

        let big = Frame::from_fn(256, 256, |x, y| Rgb([(x ^ y) as u8, (x * y) as u8, x as u8]));
        let err = buffer.add_frame(&big).unwrap_err();
        assert!(matches!(err, BufferError::FrameTooLarge { .. }));
        assert_eq!(buffer.frame_count(), 1);
        assert_eq!(buffer.size_bytes(), before);
    }

    #[test]
    fn test_frames_since_counts_past_full_buffer() {
        let one = encoded_size(&marked_frame(0));
        let buffer = FrameBuffer::new(one * 3, 90);
        for id in 0..3u8 {
            buffer.add_frame(&marked_frame(id)).unwrap();
        }
        let baseline = buffer.latest_sequence();

        buffer.add_frame(&marked_frame(100)).unwrap();
        buffer.add_frame(&marked_frame(200)).unwrap();

        // Length does not grow once the budget is reached, yet two frames are new
        assert!(buffer.frame_count() <= 3);
        let new_frames = buffer.frames_since(baseline, 10);
        assert_eq!(new_frames.len(), 2);
        assert_eq!(new_frames[1].sequence(), baseline + 2);
        assert!(mark_of(&new_frames[1].decode().unwrap()) >= 197);

        let limited = buffer.frames_since(baseline, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sequence(), baseline + 1);
    }

    #[test]
    fn test_clear_resets_size_but_not_sequence() {
        let buffer = FrameBuffer::new(1 << 20, 90);
        buffer.add_frame(&marked_frame(1)).unwrap();
        buffer.add_frame(&marked_frame(2)).unwrap();
        buffer.clear();

        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.size_bytes(), 0);
        assert!(buffer.latest_frame().is_none());
        assert_eq!(buffer.add_frame(&marked_frame(3)).unwrap(), 3);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let one = encoded_size(&marked_frame(0));
        let buffer = Arc::new(FrameBuffer::new(one * 8, 90));

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for id in 0..200u32 {
                    buffer.add_frame(&marked_frame((id % 250) as u8)).unwrap();
                }
            })
        };

        for _ in 0..50 {
            let frames = buffer.get_frames(Some(4)).unwrap();
            assert!(frames.len() <= 4);
            assert!(buffer.size_bytes() <= buffer.max_bytes());
        }

        writer.join().unwrap();
        assert!(buffer.size_bytes() <= buffer.max_bytes());
        assert_eq!(buffer.latest_sequence(), 200);
    }
}
