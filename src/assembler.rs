// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Revolution (frame) assembly for one sensor source.
//!
//! The [`FrameAssembler`] consumes decoded packets of a single source in
//! arrival order. It holds one packet back: a packet's last column needs the
//! first azimuth of the following packet, both for interpolation and for the
//! boundary test, so a packet is routed only once its successor arrives.
//!
//! # Frame Boundaries
//!
//! Azimuths are measured relative to the first azimuth ever seen from the
//! source. A boundary is crossed between two consecutive columns when the
//! relative azimuth decreases:
//!
//! ```text
//! p(az) = (az + 36000 - initial_azimuth) mod 36000
//! crossed = p(next) < p(curr)
//! ```
//!
//! The column that triggers the crossing, and every later column of the same
//! packet, belong to the next frame. Those points are staged while the rest
//! of the packet is routed; the frame is closed after the packet, staged
//! points are promoted and the frame index advances.
//!
//! ```ignore
//! let mut assembler = FrameAssembler::new("192.168.1.201", 1_000_000);
//! for packet in packets {
//!     if let Advance::Closed { frame: Some(frame), .. } =
//!         assembler.push(packet, &AllFrames, &mut stats)
//!     {
//!         sink.write(&frame)?;
//!     }
//! }
//! ```

use crate::{
    angles::AZIMUTH_UNITS,
    buffer::FrameBuffer,
    lidar::{DecodeStats, Frame, LidarPoint, ReturnMode},
    velodyne::DecodedPacket,
};
use tracing::{debug, warn};

/// Decides which frame indices get their points built.
///
/// Frames that are not selected still advance the frame index.
pub trait FrameSelector {
    fn wants(&self, frame_index: u64) -> bool;
}

/// Selects every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllFrames;

impl FrameSelector for AllFrames {
    fn wants(&self, _frame_index: u64) -> bool {
        true
    }
}

impl<F: Fn(u64) -> bool> FrameSelector for F {
    fn wants(&self, frame_index: u64) -> bool {
        self(frame_index)
    }
}

/// Whether the step from `curr` to `next` wraps past `initial`.
#[inline]
pub fn crosses_boundary(initial: u16, curr: u16, next: u16) -> bool {
    let units = AZIMUTH_UNITS as u32;
    let reference = units - initial as u32 % units;
    let relative = |azimuth: u16| (azimuth as u32 % units + reference) % units;
    relative(next) < relative(curr)
}

/// Result of pushing one packet.
#[derive(Debug, PartialEq)]
pub enum Advance {
    /// The packet was held or routed, no frame closed.
    Accumulating,
    /// Frame `index` closed. `frame` is `None` when the selector did not
    /// want it.
    Closed { index: u64, frame: Option<Frame> },
}

/// Assembly state of a source once its first packet has arrived.
#[derive(Debug)]
pub struct SourceState {
    initial_azimuth: u16,
    next_packet_first_azimuth: u16,
    current_packet: DecodedPacket,
    frame_index: u64,
    buffer: FrameBuffer,
    overflow_warned: bool,
}

impl SourceState {
    fn new(first: DecodedPacket, max_frame_points: usize) -> Self {
        Self {
            initial_azimuth: first.first_azimuth(),
            next_packet_first_azimuth: first.first_azimuth(),
            current_packet: first,
            frame_index: 0,
            buffer: FrameBuffer::new(max_frame_points),
            overflow_warned: false,
        }
    }

    pub fn initial_azimuth(&self) -> u16 {
        self.initial_azimuth
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Points collected so far for the open frame.
    pub fn buffered_points(&self) -> usize {
        self.buffer.current().len()
    }

    fn advance(
        &mut self,
        address: &str,
        next: DecodedPacket,
        selector: &impl FrameSelector,
        stats: &mut DecodeStats,
    ) -> Advance {
        self.next_packet_first_azimuth = next.first_azimuth();
        let packet = std::mem::replace(&mut self.current_packet, next);

        if !self.route(address, &packet, selector, stats) {
            return Advance::Accumulating;
        }

        let index = self.frame_index;
        let points = self.buffer.promote();
        self.frame_index += 1;
        self.overflow_warned = false;
        stats.frames_closed += 1;

        let frame = if selector.wants(index) {
            debug!(source = address, index, points = points.len(), "frame closed");
            Some(Frame::new(address, index, points))
        } else {
            None
        };
        Advance::Closed { index, frame }
    }

    /// Route every return of `packet`; returns whether a boundary was crossed.
    fn route(
        &mut self,
        address: &str,
        packet: &DecodedPacket,
        selector: &impl FrameSelector,
        stats: &mut DecodeStats,
    ) -> bool {
        // Dual-return packets repeat each firing in a column pair, so
        // boundaries and interpolation work on whole pairs.
        let step = match packet.return_mode {
            ReturnMode::Single => 1,
            ReturnMode::Dual => 2,
        };
        let supported = packet.model().is_supported();
        let mut crossed = false;

        for (index, column) in packet.columns.iter().enumerate() {
            let next_index = (index / step + 1) * step;
            let next_azimuth = packet
                .columns
                .get(next_index)
                .map_or(self.next_packet_first_azimuth, |column| column.azimuth);

            if index % step == 0
                && crosses_boundary(self.initial_azimuth, column.azimuth, next_azimuth)
            {
                if crossed {
                    stats.extra_wraps += 1;
                    warn!(
                        source = address,
                        frame = self.frame_index,
                        azimuth = column.azimuth,
                        "second azimuth wrap inside one packet"
                    );
                }
                crossed = true;
            }

            let target = if crossed {
                self.frame_index + 1
            } else {
                self.frame_index
            };
            if !selector.wants(target) {
                continue;
            }

            for (laser_id, channel) in column.channels.iter().enumerate() {
                if channel.distance == 0 {
                    continue;
                }
                if !supported {
                    stats.unsupported_points += 1;
                    continue;
                }

                let point = LidarPoint {
                    laser_id: laser_id as u8,
                    product_id: packet.product_id,
                    distance_raw: channel.distance,
                    azimuth_raw: column.azimuth,
                    next_azimuth_raw: next_azimuth,
                    reflectivity: channel.reflectivity,
                    column: index as u8,
                    return_mode: packet.return_mode,
                    packet_timestamp: packet.timestamp,
                };
                let stored = if crossed {
                    self.buffer.push_staged(point)
                } else {
                    self.buffer.push_current(point)
                };
                if !stored {
                    stats.overflow_points += 1;
                    if !self.overflow_warned {
                        self.overflow_warned = true;
                        warn!(
                            source = address,
                            frame = target,
                            limit = self.buffer.limit(),
                            "frame point limit reached, dropping returns"
                        );
                    }
                }
            }
        }

        crossed
    }
}

/// Per-source assembler states.
#[derive(Debug)]
pub enum AssemblerState {
    /// No packet seen yet.
    Empty,
    Accumulating(SourceState),
}

/// Frame-boundary state machine for one source address.
#[derive(Debug)]
pub struct FrameAssembler {
    address: String,
    max_frame_points: usize,
    state: AssemblerState,
}

impl FrameAssembler {
    /// Create an assembler bounding each frame to `max_frame_points`.
    pub fn new(address: impl Into<String>, max_frame_points: usize) -> Self {
        Self {
            address: address.into(),
            max_frame_points,
            state: AssemblerState::Empty,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> &AssemblerState {
        &self.state
    }

    /// Index of the frame currently being filled.
    pub fn frame_index(&self) -> u64 {
        match &self.state {
            AssemblerState::Empty => 0,
            AssemblerState::Accumulating(state) => state.frame_index,
        }
    }

    /// Feed the next decoded packet of this source.
    ///
    /// The packet is held back and the previously held packet is routed. At
    /// most one frame closes per call.
    ///
    /// # Arguments
    ///
    /// * `packet` - Next packet of this source in capture order
    /// * `selector` - Frames whose points should be built
    /// * `stats` - Counters for dropped returns and wraps
    pub fn push(
        &mut self,
        packet: DecodedPacket,
        selector: &impl FrameSelector,
        stats: &mut DecodeStats,
    ) -> Advance {
        match &mut self.state {
            AssemblerState::Empty => {
                debug!(
                    source = %self.address,
                    model = %packet.model(),
                    initial_azimuth = packet.first_azimuth(),
                    "new lidar source"
                );
                self.state =
                    AssemblerState::Accumulating(SourceState::new(packet, self.max_frame_points));
                Advance::Accumulating
            }
            AssemblerState::Accumulating(state) => {
                state.advance(&self.address, packet, selector, stats)
            }
        }
    }

    /// End of stream. The open frame never wrapped and is discarded; returns
    /// the number of points dropped with it.
    pub fn finish(self) -> usize {
        match self.state {
            AssemblerState::Empty => 0,
            AssemblerState::Accumulating(state) => {
                let discarded = state.buffer.current().len() + state.buffer.staged().len();
                debug!(
                    source = %self.address,
                    frame = state.frame_index,
                    discarded,
                    "discarding trailing partial frame"
                );
                discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lidar::{VLP16, VLP32C},
        velodyne::{DUAL_RETURN, PacketBuilder, decode},
    };

    /// Packets with `count * 12` columns advancing `step` per column.
    fn sweep(product_id: u8, start: u16, step: u16, count: usize) -> Vec<DecodedPacket> {
        (0..count)
            .map(|k| {
                let first = (start as u32 + (k * 12) as u32 * step as u32) % 36000;
                let data = PacketBuilder::new(product_id)
                    .timestamp(k as u32 * 1000)
                    .azimuths(first as u16, step)
                    .fill(500, 7)
                    .build();
                decode(&data).unwrap()
            })
            .collect()
    }

    fn run(
        assembler: &mut FrameAssembler,
        packets: Vec<DecodedPacket>,
        selector: &impl FrameSelector,
        stats: &mut DecodeStats,
    ) -> Vec<(u64, Option<Frame>)> {
        packets
            .into_iter()
            .filter_map(|packet| match assembler.push(packet, selector, stats) {
                Advance::Closed { index, frame } => Some((index, frame)),
                Advance::Accumulating => None,
            })
            .collect()
    }

    #[test]
    fn test_crosses_boundary() {
        assert!(crosses_boundary(0, 35980, 0));
        assert!(!crosses_boundary(0, 0, 20));
        assert!(crosses_boundary(1000, 980, 1000));
        assert!(!crosses_boundary(1000, 1000, 1020));
        assert!(!crosses_boundary(1000, 35990, 10));
        assert!(!crosses_boundary(500, 500, 500));
    }

    #[test]
    fn test_first_packet_is_held() {
        let mut assembler = FrameAssembler::new("a", 1000);
        let mut stats = DecodeStats::default();
        assert!(matches!(assembler.state(), AssemblerState::Empty));

        let packets = sweep(VLP32C, 0, 20, 1);
        assert_eq!(
            assembler.push(packets[0].clone(), &AllFrames, &mut stats),
            Advance::Accumulating
        );
        match assembler.state() {
            AssemblerState::Accumulating(state) => {
                assert_eq!(state.initial_azimuth(), 0);
                assert_eq!(state.buffered_points(), 0);
            }
            AssemblerState::Empty => panic!("still empty"),
        }
    }

    #[test]
    fn test_one_frame_per_wrap() {
        // 1000 -> 35980 -> 0 -> 980 is one wrap relative to 1000, with
        // 150 packets per revolution.
        let mut assembler = FrameAssembler::new("192.168.1.201", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(
            &mut assembler,
            sweep(VLP32C, 1000, 20, 161),
            &AllFrames,
            &mut stats,
        );

        assert_eq!(closed.len(), 1);
        let (index, frame) = &closed[0];
        assert_eq!(*index, 0);
        let frame = frame.as_ref().unwrap();
        assert_eq!(frame.source, "192.168.1.201");
        // Last column (980 -> 1000) opens the next frame.
        assert_eq!(frame.len(), (150 * 12 - 1) * 32);
        assert!(frame.points.iter().all(|p| p.azimuth_raw != 980));
        assert_eq!(assembler.frame_index(), 1);
        assert_eq!(stats.frames_closed, 1);
        assert_eq!(stats.extra_wraps, 0);
    }

    #[test]
    fn test_triggering_column_moves_to_next_frame() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(
            &mut assembler,
            sweep(VLP32C, 0, 300, 21),
            &AllFrames,
            &mut stats,
        );

        // 10 packets per revolution; packet 20 is only held.
        assert_eq!(closed.len(), 2);
        let first = closed[0].1.as_ref().unwrap();
        let second = closed[1].1.as_ref().unwrap();
        assert_eq!(first.len(), 119 * 32);
        assert_eq!(second.len(), 120 * 32);
        assert_eq!(second.points[0].azimuth_raw, 35700);
        assert_eq!(second.points[0].next_azimuth_raw, 0);
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_point_order() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(
            &mut assembler,
            sweep(VLP32C, 0, 300, 11),
            &AllFrames,
            &mut stats,
        );
        let frame = closed[0].1.as_ref().unwrap();
        for pair in frame.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let key = |p: LidarPoint| (p.packet_timestamp, p.column, p.laser_id);
            assert!(key(a) < key(b));
        }
    }

    #[test]
    fn test_unselected_frames_advance_without_points() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let odd = |index: u64| index % 2 == 1;
        let closed = run(&mut assembler, sweep(VLP32C, 0, 300, 41), &odd, &mut stats);

        let indices: Vec<u64> = closed.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(closed[0].1.is_none());
        assert!(closed[2].1.is_none());
        assert_eq!(closed[1].1.as_ref().unwrap().len(), 120 * 32);
        assert_eq!(closed[3].1.as_ref().unwrap().len(), 120 * 32);
    }

    #[test]
    fn test_zero_distance_yields_no_points() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let packets: Vec<DecodedPacket> = (0..11u32)
            .map(|k| {
                let data = PacketBuilder::new(VLP32C)
                    .azimuths((k * 12 * 300 % 36000) as u16, 300)
                    .build();
                decode(&data).unwrap()
            })
            .collect();
        let closed = run(&mut assembler, packets, &AllFrames, &mut stats);
        assert_eq!(closed.len(), 1);
        assert!(closed[0].1.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_model_counted() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(&mut assembler, sweep(0xA1, 0, 300, 11), &AllFrames, &mut stats);
        assert_eq!(closed.len(), 1);
        assert!(closed[0].1.as_ref().unwrap().is_empty());
        assert_eq!(stats.unsupported_points, 10 * 12 * 32);
    }

    #[test]
    fn test_overflow_bounded() {
        let mut assembler = FrameAssembler::new("a", 100);
        let mut stats = DecodeStats::default();
        // Small steps never wrap.
        let closed = run(&mut assembler, sweep(VLP16, 0, 1, 5), &AllFrames, &mut stats);
        assert!(closed.is_empty());
        match assembler.state() {
            AssemblerState::Accumulating(state) => assert_eq!(state.buffered_points(), 100),
            AssemblerState::Empty => panic!("still empty"),
        }
        assert_eq!(stats.overflow_points, 4 * 12 * 32 - 100);
        assert_eq!(assembler.finish(), 100);
    }

    #[test]
    fn test_lookahead_interpolation() {
        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(&mut assembler, sweep(VLP32C, 0, 300, 11), &AllFrames, &mut stats);
        let frame = closed[0].1.as_ref().unwrap();
        // Column 11 of the first packet looks ahead to packet 1.
        let last = frame.points.iter().find(|p| p.column == 11).unwrap();
        assert_eq!(last.azimuth_raw, 3300);
        assert_eq!(last.next_azimuth_raw, 3600);
    }

    #[test]
    fn test_dual_return_pairs() {
        // Pairs share an azimuth and advance 600 per pair.
        let packets: Vec<DecodedPacket> = (0..11u32)
            .map(|k| {
                let mut builder = PacketBuilder::new(VLP32C)
                    .return_mode(DUAL_RETURN)
                    .fill(500, 7);
                for column in 0..12u32 {
                    let azimuth = ((k * 6 + column / 2) * 600) % 36000;
                    builder = builder.azimuth(column as usize, azimuth as u16);
                }
                decode(&builder.build()).unwrap()
            })
            .collect();

        let mut assembler = FrameAssembler::new("a", 1_000_000);
        let mut stats = DecodeStats::default();
        let closed = run(&mut assembler, packets, &AllFrames, &mut stats);
        assert_eq!(closed.len(), 1);
        assert_eq!(stats.extra_wraps, 0);
        let frame = closed[0].1.as_ref().unwrap();
        // The final pair (35400) opens the next frame as a whole.
        assert_eq!(frame.len(), 118 * 32);
        let first = frame.points[0];
        assert_eq!(first.return_mode, ReturnMode::Dual);
        assert_eq!(first.next_azimuth_raw, 600);
    }
}
