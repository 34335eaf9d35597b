// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common LiDAR types shared by the decoder, the frame assembler and the
//! output sinks.
//!
//! A [`LidarPoint`] keeps the raw packet quantities only (raw distance, raw
//! column azimuths, channel slot). Millimetre distances, precise azimuths,
//! elevation angles, Cartesian coordinates and absolute timestamps are
//! derived on demand through the [`AngleTable`] so that rounding happens once,
//! when a [`PointRecord`] is produced for serialization.

use crate::{
    angles::{self, AngleTable},
    calibration::Extrinsics,
};
use serde::Serialize;
use std::{fmt, path::PathBuf};

/// Product ID of the VLP-16 / Puck LITE.
pub const VLP16: u8 = 0x22;

/// Product ID of the VLP-32C.
pub const VLP32C: u8 = 0x28;

/// Common error type for capture decoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload length does not match a lidar data packet.
    #[error("not a lidar packet: {len} bytes")]
    NotALidarPacket { len: usize },
    /// Product ID without angle correction support.
    #[error("unsupported lidar model: product id 0x{0:02x}")]
    UnsupportedModel(u8),
    /// Channel slot outside the 32 slots of a firing column.
    #[error("invalid laser channel {0}")]
    InvalidLaser(u8),
    /// Input file could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Capture container could not be parsed.
    #[error("pcap error: {0}")]
    Pcap(String),
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Raster encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    /// Output directory is missing or unusable.
    #[error("output directory {}: {reason}", path.display())]
    OutputDir { path: PathBuf, reason: String },
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
    /// The frame writer hung up before the workers finished.
    #[error("frame channel closed")]
    ChannelClosed,
    /// One or more decode workers did not complete.
    #[error("decode workers failed: {0:?}")]
    WorkersFailed(Vec<usize>),
}

/// Sensor model identified by the product ID byte of a data packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LidarModel {
    Hdl32e,
    Vlp16,
    PuckHiRes,
    Vlp32c,
    Velarray,
    Vls128,
    Unknown(u8),
}

impl From<u8> for LidarModel {
    fn from(value: u8) -> Self {
        match value {
            0x21 => LidarModel::Hdl32e,
            VLP16 => LidarModel::Vlp16,
            0x24 => LidarModel::PuckHiRes,
            VLP32C => LidarModel::Vlp32c,
            0x31 => LidarModel::Velarray,
            0xA1 => LidarModel::Vls128,
            other => LidarModel::Unknown(other),
        }
    }
}

impl LidarModel {
    /// Product ID byte as found at the end of a data packet.
    pub fn product_id(self) -> u8 {
        match self {
            LidarModel::Hdl32e => 0x21,
            LidarModel::Vlp16 => VLP16,
            LidarModel::PuckHiRes => 0x24,
            LidarModel::Vlp32c => VLP32C,
            LidarModel::Velarray => 0x31,
            LidarModel::Vls128 => 0xA1,
            LidarModel::Unknown(id) => id,
        }
    }

    /// Marketing name of the model, "Unknown" for unrecognized IDs.
    pub fn name(self) -> &'static str {
        match self {
            LidarModel::Hdl32e => "HDL-32E",
            LidarModel::Vlp16 => "VLP-16/Puck LITE",
            LidarModel::PuckHiRes => "Puck Hi-Res",
            LidarModel::Vlp32c => "VLP-32C",
            LidarModel::Velarray => "Velarray",
            LidarModel::Vls128 => "VLS-128",
            LidarModel::Unknown(_) => "Unknown",
        }
    }

    /// Whether angle correction tables exist for this model.
    pub fn is_supported(self) -> bool {
        matches!(self, LidarModel::Vlp16 | LidarModel::Vlp32c)
    }
}

impl fmt::Display for LidarModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.product_id())
    }
}

/// Return mode reported by the packet's return-mode byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReturnMode {
    #[default]
    Single,
    Dual,
}

/// One laser return, kept in raw packet units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LidarPoint {
    /// Channel slot within the firing column (0..32)
    pub laser_id: u8,
    pub product_id: u8,
    /// Distance in 2 mm units
    pub distance_raw: u16,
    /// Azimuth of the firing column, hundredths of a degree
    pub azimuth_raw: u16,
    /// Azimuth of the following firing column, hundredths of a degree
    pub next_azimuth_raw: u16,
    pub reflectivity: u8,
    /// Firing column index within the packet (0..12)
    pub column: u8,
    pub return_mode: ReturnMode,
    /// Packet timestamp in microseconds past the hour
    pub packet_timestamp: u32,
}

impl LidarPoint {
    pub fn model(&self) -> LidarModel {
        LidarModel::from(self.product_id)
    }

    /// Distance in millimetres.
    #[inline]
    pub fn distance_mm(&self) -> f64 {
        2.0 * self.distance_raw as f64
    }

    /// Laser ID as reported in output records. The VLP-16 fills both halves
    /// of a column with the same 16 lasers.
    pub fn output_laser_id(&self) -> u8 {
        match self.model() {
            LidarModel::Vlp16 => self.laser_id % 16,
            _ => self.laser_id,
        }
    }

    /// Firing azimuth interpolated between this and the next column.
    pub fn precise_azimuth(&self) -> Result<u16, Error> {
        angles::precise_azimuth(
            self.azimuth_raw,
            self.next_azimuth_raw,
            self.laser_id,
            self.product_id,
        )
    }

    pub fn elevation_degrees(&self, table: &AngleTable) -> Result<f64, Error> {
        table.elevation_degrees(self.product_id, self.laser_id)
    }

    /// Sensor-local Cartesian coordinates in millimetres, unrounded.
    pub fn xyz(&self, table: &AngleTable) -> Result<[f64; 3], Error> {
        let azimuth = self.precise_azimuth()?;
        let elevation = self.elevation_degrees(table)?;
        let offset = table.azimuth_offset_degrees(self.product_id, self.laser_id)?;
        Ok(angles::to_cartesian(
            self.distance_mm(),
            azimuth,
            elevation,
            offset,
        ))
    }

    /// Absolute firing time of this laser in microseconds.
    pub fn timestamp_us(&self, table: &AngleTable) -> Result<u32, Error> {
        let offset = table.timing_offset_micros(
            self.product_id,
            self.laser_id,
            self.column,
            self.return_mode,
        )?;
        Ok(self.packet_timestamp.wrapping_add(offset))
    }
}

/// One sensor revolution from a single source address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// Source address of the sensor that produced the frame
    pub source: String,
    /// Revolution index, counted per source from the start of the capture
    pub index: u64,
    /// Points in packet, column, channel order
    pub points: Vec<LidarPoint>,
}

impl Frame {
    pub fn new(source: impl Into<String>, index: u64, points: Vec<LidarPoint>) -> Self {
        Self {
            source: source.into(),
            index,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Convert every point into an output record.
    ///
    /// Points whose model has no correction tables are skipped; the second
    /// value of the tuple is the number of skipped points.
    pub fn records(&self, table: &AngleTable, extrinsics: &Extrinsics) -> (Vec<PointRecord>, usize) {
        let mut skipped = 0;
        let records = self
            .points
            .iter()
            .filter_map(|point| match PointRecord::from_point(point, table, extrinsics) {
                Ok(record) => Some(record),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        (records, skipped)
    }
}

/// Output record for one point, in the shape handed to the sinks.
///
/// Serialized with the key names of the decoder's JSON frame files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PointRecord {
    #[serde(rename = "lidarModel")]
    pub lidar_model: u8,
    #[serde(rename = "laserID")]
    pub laser_id: u8,
    #[serde(rename = "distance")]
    pub distance_mm: u32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(rename = "azimuth")]
    pub azimuth_centidegrees: u16,
    pub intensity: u8,
    #[serde(rename = "timestamp")]
    pub timestamp_us: u32,
}

impl PointRecord {
    /// Build a record, applying the extrinsic calibration before the
    /// coordinates are rounded to whole millimetres.
    pub fn from_point(
        point: &LidarPoint,
        table: &AngleTable,
        extrinsics: &Extrinsics,
    ) -> Result<Self, Error> {
        let [x, y, z] = extrinsics.apply(point.xyz(table)?);
        Ok(Self {
            lidar_model: point.product_id,
            laser_id: point.output_laser_id(),
            distance_mm: 2 * point.distance_raw as u32,
            x: x.round() as i32,
            y: y.round() as i32,
            z: z.round() as i32,
            azimuth_centidegrees: point.precise_azimuth()?,
            intensity: point.reflectivity,
            timestamp_us: point.timestamp_us(table)?,
        })
    }
}

/// Diagnostic counters collected while decoding.
///
/// Per-packet and per-point failures are counted here instead of aborting
/// the decode pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// All packets read from the capture
    pub packets: u64,
    /// Packets with the lidar data packet length
    pub lidar_packets: u64,
    /// Position (GPS) packets, skipped
    pub position_packets: u64,
    /// Packets of any other length, skipped
    pub other_packets: u64,
    /// Lidar packets without a parsable source address
    pub unattributed_packets: u64,
    /// Lidar packets from addresses outside the whitelist
    pub ignored_packets: u64,
    pub decode_errors: u64,
    pub frames_closed: u64,
    pub frames_emitted: u64,
    /// Returns dropped because the product ID has no correction tables
    pub unsupported_points: u64,
    /// Returns dropped because a frame exceeded the point limit
    pub overflow_points: u64,
    /// Additional wraps seen inside a packet that had already wrapped
    pub extra_wraps: u64,
}

impl DecodeStats {
    /// Accumulate the counters of another worker.
    pub fn merge(&mut self, other: &DecodeStats) {
        self.packets += other.packets;
        self.lidar_packets += other.lidar_packets;
        self.position_packets += other.position_packets;
        self.other_packets += other.other_packets;
        self.unattributed_packets += other.unattributed_packets;
        self.ignored_packets += other.ignored_packets;
        self.decode_errors += other.decode_errors;
        self.frames_closed += other.frames_closed;
        self.frames_emitted += other.frames_emitted;
        self.unsupported_points += other.unsupported_points;
        self.overflow_points += other.overflow_points;
        self.extra_wraps += other.extra_wraps;
    }
}
