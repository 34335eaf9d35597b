// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PCAP file packet source and capture scanning.
//!
//! [`PcapSource`] streams link-layer frames from legacy PCAP or PCAPNG files
//! without loading the capture into memory, so every decode worker can open
//! its own independent reader on the same file.
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_pcapdecoder::{PcapSource, packet_source::PacketSource};
//!
//! let mut source = PcapSource::open("drive.pcap")?;
//! let sources = discover_sources(&mut source, DISCOVERY_THRESHOLD)?;
//!
//! let mut source = PcapSource::open("drive.pcap")?;
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     let received = source.recv(&mut buf)?;
//!     // Process buf[..received.len]
//! }
//! ```

use crate::{
    lidar::{Error, LidarModel},
    packet_source::{PacketSource, Received, source_address},
    velodyne::{LIDAR_PACKET_SIZE, PacketKind},
};
use pcap_parser::{
    Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader,
    traits::{PcapNGPacketBlock, PcapReaderIterator},
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom},
    path::Path,
};
use tracing::{debug, instrument, warn};

/// Reader buffer size; must hold the largest captured block.
const READER_CAPACITY: usize = 1 << 16;

/// Section Header Block type, the first four bytes of a PCAPNG file.
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Lidar packets a source must exceed before discovery stops.
pub const DISCOVERY_THRESHOLD: usize = 4;

type Input = Box<dyn Read + Send>;

/// Container reader chosen from the file magic.
enum Reader {
    Legacy(LegacyPcapReader<Input>),
    Ng(PcapNGReader<Input>),
}

impl Reader {
    fn new(magic: &[u8], input: Input) -> Result<Self, String> {
        if magic.starts_with(&PCAPNG_MAGIC) {
            PcapNGReader::new(READER_CAPACITY, input)
                .map(Reader::Ng)
                .map_err(|e| format!("invalid PCAPNG header: {:?}", e))
        } else {
            LegacyPcapReader::new(READER_CAPACITY, input)
                .map(Reader::Legacy)
                .map_err(|e| format!("invalid PCAP header: {:?}", e))
        }
    }

    fn blocks(&mut self) -> &mut dyn PcapReaderIterator {
        match self {
            Reader::Legacy(reader) => reader,
            Reader::Ng(reader) => reader,
        }
    }
}

/// Streaming PCAP/PCAPNG packet source.
///
/// One frame is read ahead so that [`PacketSource::has_more`] is exact. A
/// capture that ends inside a record, as left behind by an interrupted
/// capture, ends the stream after the last complete packet.
pub struct PcapSource {
    reader: Reader,
    pending: Option<Vec<u8>>,
    packets_read: u64,
    truncated: bool,
}

impl PcapSource {
    /// Open a capture file from disk.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to PCAP or PCAPNG file
    ///
    /// # Returns
    ///
    /// `Error::SourceOpen` if the file cannot be opened, `Error::Pcap` if the
    /// file header is not a capture format.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let open_error = |source| Error::SourceOpen {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(open_error)?;

        let mut magic = [0u8; 4];
        let read = file.read(&mut magic).map_err(open_error)?;
        file.seek(SeekFrom::Start(0)).map_err(open_error)?;

        let reader = Reader::new(&magic[..read], Box::new(file))
            .map_err(|e| Error::Pcap(format!("{}: {}", path.display(), e)))?;
        Ok(Self::with_reader(reader))
    }

    /// Read a capture held in memory.
    ///
    /// Useful for embedded test data.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Error> {
        let magic: Vec<u8> = data.iter().take(4).copied().collect();
        let reader = Reader::new(&magic, Box::new(Cursor::new(data))).map_err(Error::Pcap)?;
        Ok(Self::with_reader(reader))
    }

    fn with_reader(reader: Reader) -> Self {
        let mut source = Self {
            reader,
            pending: None,
            packets_read: 0,
            truncated: false,
        };
        source.pending = source.read_frame();
        source
    }

    /// Number of frames handed out so far.
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Whether the capture ended inside a record or on unparsable data.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Pull the next packet block, skipping headers and metadata blocks.
    ///
    /// Returns `None` at the end of the capture. A damaged tail cannot be
    /// resynchronized, so it ends the stream with a warning.
    fn read_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let blocks = self.reader.blocks();
            match blocks.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::Legacy(packet) => Some(packet.data.to_vec()),
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            Some(epb.packet_data().to_vec())
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            Some(spb.packet_data().to_vec())
                        }
                        _ => None,
                    };
                    blocks.consume(offset);
                    if frame.is_some() {
                        return frame;
                    }
                }
                Err(PcapError::Eof) => return None,
                Err(PcapError::Incomplete(_)) => {
                    if blocks.reader_exhausted() {
                        return self.end_damaged("capture ends inside a record");
                    }
                    if let Err(e) = blocks.refill() {
                        let reason = format!("read failed: {:?}", e);
                        return self.end_damaged(&reason);
                    }
                }
                Err(PcapError::UnexpectedEof) => {
                    return self.end_damaged("capture ends inside a record");
                }
                Err(e) => {
                    let reason = format!("{:?}", e);
                    return self.end_damaged(&reason);
                }
            }
        }
    }

    fn end_damaged(&mut self, reason: &str) -> Option<Vec<u8>> {
        self.truncated = true;
        warn!(
            packets = self.packets_read + self.pending.is_some() as u64,
            "stopping at damaged capture tail: {}", reason
        );
        None
    }
}

impl PacketSource for PcapSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, Error> {
        let frame = self.pending.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no more packets in PCAP",
            ))
        })?;
        self.pending = self.read_frame();
        self.packets_read += 1;

        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(Received {
            len,
            source: source_address(&frame),
        })
    }

    fn has_more(&self) -> bool {
        self.pending.is_some()
    }
}

/// Find the lidar source addresses present in a capture.
///
/// Walks lidar-sized packets counting per address, and stops as soon as any
/// address has been seen more than `threshold` times. Addresses are returned
/// in order of first appearance.
#[instrument(skip(source))]
pub fn discover_sources<S: PacketSource>(
    source: &mut S,
    threshold: usize,
) -> Result<Vec<String>, Error> {
    let mut buf = vec![0u8; READER_CAPACITY];
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();

    while source.has_more() {
        let received = source.recv(&mut buf)?;
        if PacketKind::classify(received.len) != PacketKind::Lidar {
            continue;
        }
        let Some(address) = received.source else {
            continue;
        };

        let count = counts.entry(address.clone()).or_insert(0);
        if *count == 0 {
            debug!(%address, "discovered lidar source");
            order.push(address);
        }
        *count += 1;
        if *count > threshold {
            break;
        }
    }

    Ok(order)
}

/// Per-source counters of a capture scan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub packets: u64,
    /// Product ID of the first packet from this source
    pub product_id: u8,
    pub model: String,
}

/// Packet counts for a whole capture, reported by `--stats-only`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub total_packets: u64,
    pub lidar_packets: u64,
    pub position_packets: u64,
    pub other_packets: u64,
    pub sources: BTreeMap<String, SourceStats>,
}

impl CaptureStats {
    /// Scan a source to exhaustion.
    #[instrument(skip(source))]
    pub fn collect<S: PacketSource>(source: &mut S) -> Result<Self, Error> {
        let mut stats = CaptureStats::default();
        let mut buf = vec![0u8; READER_CAPACITY];

        while source.has_more() {
            let received = source.recv(&mut buf)?;
            stats.total_packets += 1;
            match PacketKind::classify(received.len) {
                PacketKind::Lidar => {
                    stats.lidar_packets += 1;
                    if let Some(address) = received.source {
                        let entry = stats.sources.entry(address).or_insert_with(|| {
                            let product_id = buf[LIDAR_PACKET_SIZE - 1];
                            SourceStats {
                                packets: 0,
                                product_id,
                                model: LidarModel::from(product_id).name().to_string(),
                            }
                        });
                        entry.packets += 1;
                    }
                }
                PacketKind::Position => stats.position_packets += 1,
                PacketKind::Other => stats.other_packets += 1,
            }
        }

        Ok(stats)
    }
}
