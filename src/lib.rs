// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Velodyne PCAP Decoder Library
//!
//! Decodes VLP-16 and VLP-32C data packets from PCAP/PCAPNG captures and
//! regroups them into one point cloud per sensor revolution.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │  PacketSource   │ ──► │ PacketDecoder │ ──► │ FrameAssembler  │
//! │  (pcap/test)    │     │  (velodyne)   │     │  (per address)  │
//! └─────────────────┘     └───────────────┘     └─────────────────┘
//!                                                       │ Frame
//!                                                       ▼
//!                               ┌─────────────────────────────────────┐
//!                               │  kanal ──► frame writer ──► sinks   │
//!                               │  (JSON, top-down PNG, elevation)    │
//!                               └─────────────────────────────────────┘
//! ```
//!
//! A decode pass runs N workers, each reading the whole capture through its
//! own source. Frame `i` is built by worker `i % N`; the other workers only
//! follow the frame boundaries. See [`worker`] for the partitioning rules.
//!
//! Points are kept raw inside a [`Frame`] and converted to Cartesian
//! coordinates by the sinks through the [`angles::AngleTable`].
//!
//! # Modules
//!
//! - [`angles`]: Elevation, azimuth and firing-time corrections
//! - [`assembler`]: Revolution boundary detection per source
//! - [`buffer`]: Bounded point buffer of the open frame
//! - [`calibration`]: Extrinsics and camera views
//! - [`lidar`]: Common types and error handling
//! - [`packet_source`]: Packet source trait and in-memory test source
//! - [`pcap_source`]: PCAP/PCAPNG reader and capture scanning
//! - [`raster`]: PNG views of frames
//! - [`sink`]: Frame sinks and the writer thread
//! - [`velodyne`]: Data packet layout and decoder
//! - [`worker`]: Parallel decode passes
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_pcapdecoder::{
//!     DecodeOptions, FrameSink, PartitionPlan, PcapSource, angles::AngleTable,
//!     calibration::Calibration, decode_capture, sink::JsonSink,
//! };
//!
//! let table = AngleTable::new();
//! let calibration = Calibration::default();
//! let options = DecodeOptions::new(PartitionPlan::new(4, 0, -1)?);
//! let sinks: Vec<Box<dyn FrameSink>> =
//!     vec![Box::new(JsonSink::new("out", &table, &calibration))];
//!
//! let report = decode_capture(&options, |_| PcapSource::open("drive.pcap"), sinks)?;
//! println!("{} frames", report.writer.frames);
//! ```

pub mod angles;
pub mod assembler;
pub mod buffer;
pub mod calibration;
pub mod lidar;
pub mod packet_source;
pub mod pcap_source;
pub mod raster;
pub mod sink;
pub mod velodyne;
pub mod worker;

// Re-exports for convenience
pub use assembler::{FrameAssembler, FrameSelector};
pub use lidar::{DecodeStats, Error, Frame, LidarModel, LidarPoint, PointRecord, ReturnMode};
pub use packet_source::PacketSource;
pub use pcap_source::PcapSource;
pub use sink::FrameSink;
pub use velodyne::{PacketDecoder, decode};
pub use worker::{DecodeOptions, PartitionPlan, decode_capture};
