// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-source point buffers for frame assembly.
//!
//! A revolution boundary usually falls in the middle of a packet. Columns
//! after the boundary already belong to the next frame, but the current
//! frame is only closed once the whole packet has been routed. The
//! [`FrameBuffer`] therefore holds two point lists: the frame being filled
//! and the points staged for the frame after it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                  FrameBuffer                   │
//! │  ┌──────────────────┐   ┌──────────────────┐   │
//! │  │ current          │   │ staged           │   │
//! │  │ (frame N)        │ ← │ (frame N + 1)    │   │
//! │  │ Vec<LidarPoint>  │   │ Vec<LidarPoint>  │   │
//! │  └──────────────────┘   └──────────────────┘   │
//! │          │ promote()                           │
//! │          ▼                                     │
//! │   finished points handed to the sink           │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut buffer = FrameBuffer::new(1_000_000);
//! buffer.push_current(point_a);
//! buffer.push_staged(point_b);
//!
//! let finished = buffer.promote();
//! assert_eq!(finished, vec![point_a]);
//! assert_eq!(buffer.current(), &[point_b]);
//! ```

use crate::lidar::LidarPoint;

/// Typical single-return VLP-32C revolution at 10 Hz.
const INITIAL_CAPACITY: usize = 60_000;

/// Current and staged point lists of one source.
///
/// Each list is bounded by `limit`; pushes beyond it are rejected, which
/// keeps memory bounded for streams that never wrap. The caller counts the
/// rejected points.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    current: Vec<LidarPoint>,
    staged: Vec<LidarPoint>,
    limit: usize,
}

impl FrameBuffer {
    /// Create a buffer bounded to `limit` points per frame.
    pub fn new(limit: usize) -> Self {
        Self {
            current: Vec::with_capacity(INITIAL_CAPACITY.min(limit)),
            staged: Vec::new(),
            limit,
        }
    }

    /// Maximum number of points per frame.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append a point to the frame being filled.
    ///
    /// Returns `false` if the frame is full and the point was dropped.
    #[inline]
    pub fn push_current(&mut self, point: LidarPoint) -> bool {
        Self::push_bounded(&mut self.current, point, self.limit)
    }

    /// Append a point to the next frame.
    ///
    /// Returns `false` if the staged frame is full and the point was dropped.
    #[inline]
    pub fn push_staged(&mut self, point: LidarPoint) -> bool {
        Self::push_bounded(&mut self.staged, point, self.limit)
    }

    fn push_bounded(points: &mut Vec<LidarPoint>, point: LidarPoint, limit: usize) -> bool {
        if points.len() >= limit {
            return false;
        }
        points.push(point);
        true
    }

    pub fn current(&self) -> &[LidarPoint] {
        &self.current
    }

    pub fn staged(&self) -> &[LidarPoint] {
        &self.staged
    }

    /// Close the current frame.
    ///
    /// Returns the finished points; the staged points become the new
    /// current frame.
    pub fn promote(&mut self) -> Vec<LidarPoint> {
        let next = std::mem::replace(
            &mut self.staged,
            Vec::with_capacity(self.current.len().min(self.limit)),
        );
        std::mem::replace(&mut self.current, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lidar::{ReturnMode, VLP32C};

    fn point(laser_id: u8) -> LidarPoint {
        LidarPoint {
            laser_id,
            product_id: VLP32C,
            distance_raw: 100,
            azimuth_raw: 0,
            next_azimuth_raw: 20,
            reflectivity: 1,
            column: 0,
            return_mode: ReturnMode::Single,
            packet_timestamp: 0,
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = FrameBuffer::new(10);
        assert!(buffer.current().is_empty());
        assert!(buffer.staged().is_empty());
        assert_eq!(buffer.limit(), 10);
    }

    #[test]
    fn test_promote() {
        let mut buffer = FrameBuffer::new(10);
        assert!(buffer.push_current(point(1)));
        assert!(buffer.push_current(point(2)));
        assert!(buffer.push_staged(point(3)));

        let finished = buffer.promote();
        assert_eq!(finished, vec![point(1), point(2)]);
        assert_eq!(buffer.current(), &[point(3)]);
        assert!(buffer.staged().is_empty());

        let finished = buffer.promote();
        assert_eq!(finished, vec![point(3)]);
        assert!(buffer.current().is_empty());
    }

    #[test]
    fn test_limit_drops_points() {
        let mut buffer = FrameBuffer::new(2);
        assert!(buffer.push_current(point(1)));
        assert!(buffer.push_current(point(2)));
        assert!(!buffer.push_current(point(3)));
        assert!(buffer.push_staged(point(4)));
        assert_eq!(buffer.current().len(), 2);

        // The staged frame gets its own budget once promoted.
        assert_eq!(buffer.promote().len(), 2);
        assert!(buffer.push_current(point(5)));
        assert!(!buffer.push_current(point(6)));
        assert_eq!(buffer.current(), &[point(4), point(5)]);
    }

    #[test]
    fn test_zero_limit() {
        let mut buffer = FrameBuffer::new(0);
        assert!(!buffer.push_current(point(1)));
        assert!(!buffer.push_staged(point(1)));
        assert!(buffer.promote().is_empty());
    }
}
