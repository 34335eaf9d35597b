// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne VLP-16 / VLP-32C data packet decoder.
//!
//! Packets are decoded from the full captured link-layer frame: a 42-byte
//! Ethernet + IPv4 + UDP header followed by the 1206-byte sensor payload.
//!
//! # Frame Layout (1248 bytes)
//!
//! ```text
//! Offset  Size  Description
//! 0       42    Ethernet, IPv4 and UDP headers
//! 42      1200  12 firing columns of 100 bytes
//! 1242    4     Timestamp, microseconds past the hour (u32 LE)
//! 1246    1     Return mode
//! 1247    1     Product ID
//! ```
//!
//! # Firing Column (100 bytes)
//!
//! ```text
//! Offset  Size  Description
//! 0       2     Flag (0xFFEE)
//! 2       2     Azimuth, hundredths of a degree (u16 LE)
//! 4       96    32 channels of distance (u16 LE, 2 mm) + reflectivity (u8)
//! ```
//!
//! Position (GPS) packets are 554 bytes and carry no returns; they are
//! recognized by length and skipped.

use crate::lidar::{Error, LidarModel, ReturnMode};

/// Captured length of a lidar data packet, headers included.
pub const LIDAR_PACKET_SIZE: usize = 1248;

/// Captured length of a position (GPS) packet.
pub const POSITION_PACKET_SIZE: usize = 554;

/// Ethernet (14) + IPv4 (20) + UDP (8) header bytes ahead of the payload.
pub const HEADER_SIZE: usize = 42;

pub const COLUMNS_PER_PACKET: usize = 12;
pub const CHANNELS_PER_COLUMN: usize = 32;

const COLUMN_SIZE: usize = 100;
const CHANNEL_SIZE: usize = 3;
const COLUMN_FLAG: [u8; 2] = [0xFF, 0xEE];
const TIMESTAMP_OFFSET: usize = 1242;
const RETURN_MODE_OFFSET: usize = 1246;
const PRODUCT_ID_OFFSET: usize = 1247;

const _: () = assert!(HEADER_SIZE + COLUMNS_PER_PACKET * COLUMN_SIZE == TIMESTAMP_OFFSET);
const _: () = assert!(4 + CHANNELS_PER_COLUMN * CHANNEL_SIZE == COLUMN_SIZE);

/// Return-mode byte reported for dual return by VLP-16/VLP-32C firmware.
pub const DUAL_RETURN: u8 = 0x39;

/// Return-mode byte reported for strongest return.
pub const STRONGEST_RETURN: u8 = 0x37;

/// Packet classification by captured length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Lidar,
    Position,
    Other,
}

impl PacketKind {
    pub fn classify(len: usize) -> Self {
        match len {
            LIDAR_PACKET_SIZE => PacketKind::Lidar,
            POSITION_PACKET_SIZE => PacketKind::Position,
            _ => PacketKind::Other,
        }
    }
}

/// Decoder settings.
///
/// Firmware revisions disagree on the value that marks dual-return packets,
/// so the set of accepted sentinels is configurable. Any other return-mode
/// byte is treated as single return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketConfig {
    dual_return_sentinels: Vec<u8>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            dual_return_sentinels: vec![DUAL_RETURN],
        }
    }
}

impl PacketConfig {
    pub fn new(dual_return_sentinels: impl IntoIterator<Item = u8>) -> Self {
        let mut sentinels: Vec<u8> = dual_return_sentinels.into_iter().collect();
        sentinels.sort_unstable();
        sentinels.dedup();
        if sentinels.is_empty() {
            return Self::default();
        }
        Self {
            dual_return_sentinels: sentinels,
        }
    }

    pub fn dual_return_sentinels(&self) -> &[u8] {
        &self.dual_return_sentinels
    }

    pub fn return_mode(&self, byte: u8) -> ReturnMode {
        if self.dual_return_sentinels.contains(&byte) {
            ReturnMode::Dual
        } else {
            ReturnMode::Single
        }
    }
}

/// One channel measurement. A zero distance means no return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    /// Distance in 2 mm units
    pub distance: u16,
    pub reflectivity: u8,
}

/// One firing column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Column {
    /// Hundredths of a degree
    pub azimuth: u16,
    pub channels: [Channel; CHANNELS_PER_COLUMN],
}

/// Decoded lidar data packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Microseconds past the hour
    pub timestamp: u32,
    pub product_id: u8,
    pub return_mode: ReturnMode,
    pub columns: [Column; COLUMNS_PER_PACKET],
}

impl DecodedPacket {
    pub fn model(&self) -> LidarModel {
        LidarModel::from(self.product_id)
    }

    /// Azimuth of column 0, used as lookahead by the previous packet.
    pub fn first_azimuth(&self) -> u16 {
        self.columns[0].azimuth
    }

    /// Number of channels with a non-zero distance.
    pub fn return_count(&self) -> usize {
        self.columns
            .iter()
            .flat_map(|column| column.channels.iter())
            .filter(|channel| channel.distance != 0)
            .count()
    }
}

/// Stateless packet decoder holding its [`PacketConfig`].
#[derive(Clone, Debug, Default)]
pub struct PacketDecoder {
    config: PacketConfig,
}

impl PacketDecoder {
    pub fn new(config: PacketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }

    /// Decode a captured lidar data packet.
    ///
    /// # Arguments
    ///
    /// * `data` - Full link-layer frame as captured, exactly 1248 bytes
    ///
    /// # Returns
    ///
    /// `Error::NotALidarPacket` when the length does not match. Field values
    /// are not validated; malformed azimuths are reduced modulo 36000 by the
    /// angle math.
    pub fn decode(&self, data: &[u8]) -> Result<DecodedPacket, Error> {
        if data.len() != LIDAR_PACKET_SIZE {
            return Err(Error::NotALidarPacket { len: data.len() });
        }

        let mut columns = [Column::default(); COLUMNS_PER_PACKET];
        for (index, column) in columns.iter_mut().enumerate() {
            let base = HEADER_SIZE + index * COLUMN_SIZE;
            column.azimuth = u16::from_le_bytes([data[base + 2], data[base + 3]]);
            for (channel, slot) in column.channels.iter_mut().enumerate() {
                let offset = base + 4 + channel * CHANNEL_SIZE;
                slot.distance = u16::from_le_bytes([data[offset], data[offset + 1]]);
                slot.reflectivity = data[offset + 2];
            }
        }

        Ok(DecodedPacket {
            timestamp: u32::from_le_bytes([
                data[TIMESTAMP_OFFSET],
                data[TIMESTAMP_OFFSET + 1],
                data[TIMESTAMP_OFFSET + 2],
                data[TIMESTAMP_OFFSET + 3],
            ]),
            product_id: data[PRODUCT_ID_OFFSET],
            return_mode: self.config.return_mode(data[RETURN_MODE_OFFSET]),
            columns,
        })
    }
}

/// Decode with the default dual-return sentinel.
pub fn decode(data: &[u8]) -> Result<DecodedPacket, Error> {
    PacketDecoder::default().decode(data)
}

/// Builder for synthetic 1248-byte data packets.
///
/// Produces a well-formed Ethernet/IPv4/UDP header so the packets can be
/// written to capture files and attributed to a source address. Used by the
/// test suites and benchmarks.
///
/// ```ignore
/// let packet = PacketBuilder::new(VLP32C)
///     .source([192, 168, 1, 201])
///     .azimuths(1000, 20)
///     .fill(500, 10)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    data: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(product_id: u8) -> Self {
        let mut data = vec![0u8; LIDAR_PACKET_SIZE];
        for column in 0..COLUMNS_PER_PACKET {
            let base = HEADER_SIZE + column * COLUMN_SIZE;
            data[base..base + 2].copy_from_slice(&COLUMN_FLAG);
        }
        data[RETURN_MODE_OFFSET] = STRONGEST_RETURN;
        data[PRODUCT_ID_OFFSET] = product_id;
        Self { data }.source([192, 168, 1, 201])
    }

    /// Write Ethernet, IPv4 and UDP headers with the given source address.
    pub fn source(mut self, address: [u8; 4]) -> Self {
        let header = &mut self.data[..HEADER_SIZE];
        // Ethernet: broadcast destination, Velodyne OUI source, IPv4
        header[0..6].copy_from_slice(&[0xFF; 6]);
        header[6..12].copy_from_slice(&[0x60, 0x76, 0x88, 0x00, 0x00, address[3]]);
        header[12..14].copy_from_slice(&[0x08, 0x00]);

        // IPv4: no options, UDP, destination broadcast
        let total_len = (LIDAR_PACKET_SIZE - 14) as u16;
        header[14] = 0x45;
        header[15] = 0;
        header[16..18].copy_from_slice(&total_len.to_be_bytes());
        header[18..22].copy_from_slice(&[0, 0, 0x40, 0]);
        header[22] = 64;
        header[23] = 17;
        header[24..26].copy_from_slice(&[0, 0]);
        header[26..30].copy_from_slice(&address);
        header[30..34].copy_from_slice(&[255, 255, 255, 255]);
        let checksum = ipv4_checksum(&header[14..34]);
        header[24..26].copy_from_slice(&checksum.to_be_bytes());

        // UDP: data port 2368, no checksum
        let udp_len = (LIDAR_PACKET_SIZE - 34) as u16;
        header[34..36].copy_from_slice(&2368u16.to_be_bytes());
        header[36..38].copy_from_slice(&2368u16.to_be_bytes());
        header[38..40].copy_from_slice(&udp_len.to_be_bytes());
        header[40..42].copy_from_slice(&[0, 0]);
        self
    }

    pub fn timestamp(mut self, micros: u32) -> Self {
        self.data[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].copy_from_slice(&micros.to_le_bytes());
        self
    }

    pub fn return_mode(mut self, byte: u8) -> Self {
        self.data[RETURN_MODE_OFFSET] = byte;
        self
    }

    pub fn azimuth(mut self, column: usize, azimuth: u16) -> Self {
        let base = HEADER_SIZE + column * COLUMN_SIZE;
        self.data[base + 2..base + 4].copy_from_slice(&azimuth.to_le_bytes());
        self
    }

    /// Set column azimuths to `start + column * step`, wrapping at 36000.
    pub fn azimuths(mut self, start: u16, step: u16) -> Self {
        for column in 0..COLUMNS_PER_PACKET {
            let azimuth = (start as u32 + column as u32 * step as u32) % 36000;
            self = self.azimuth(column, azimuth as u16);
        }
        self
    }

    pub fn channel(mut self, column: usize, channel: usize, distance: u16, reflectivity: u8) -> Self {
        let offset = HEADER_SIZE + column * COLUMN_SIZE + 4 + channel * CHANNEL_SIZE;
        self.data[offset..offset + 2].copy_from_slice(&distance.to_le_bytes());
        self.data[offset + 2] = reflectivity;
        self
    }

    /// Set every channel of every column to the same return.
    pub fn fill(mut self, distance: u16, reflectivity: u8) -> Self {
        for column in 0..COLUMNS_PER_PACKET {
            for channel in 0..CHANNELS_PER_COLUMN {
                self = self.channel(column, channel, distance, reflectivity);
            }
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as u32)
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lidar::{VLP16, VLP32C};

    #[test]
    fn test_classify() {
        assert_eq!(PacketKind::classify(1248), PacketKind::Lidar);
        assert_eq!(PacketKind::classify(554), PacketKind::Position);
        assert_eq!(PacketKind::classify(1206), PacketKind::Other);
        assert_eq!(PacketKind::classify(0), PacketKind::Other);
    }

    #[test]
    fn test_decode_wrong_size() {
        let result = decode(&[0u8; 1206]);
        assert!(matches!(result, Err(Error::NotALidarPacket { len: 1206 })));
        let result = decode(&[0u8; 1249]);
        assert!(matches!(result, Err(Error::NotALidarPacket { len: 1249 })));
    }

    #[test]
    fn test_decode_fields() {
        let data = PacketBuilder::new(VLP32C)
            .timestamp(0x0102_0304)
            .azimuths(1000, 20)
            .channel(3, 7, 1234, 56)
            .build();

        let packet = decode(&data).unwrap();
        assert_eq!(packet.timestamp, 0x0102_0304);
        assert_eq!(packet.product_id, VLP32C);
        assert_eq!(packet.model(), LidarModel::Vlp32c);
        assert_eq!(packet.return_mode, ReturnMode::Single);
        assert_eq!(packet.first_azimuth(), 1000);
        assert_eq!(packet.columns[11].azimuth, 1220);
        assert_eq!(packet.columns[3].channels[7].distance, 1234);
        assert_eq!(packet.columns[3].channels[7].reflectivity, 56);
        assert_eq!(packet.columns[3].channels[6].distance, 0);
        assert_eq!(packet.return_count(), 1);
    }

    #[test]
    fn test_decode_column_layout() {
        // Hand-placed bytes for column 2, channel 0 and the trailer.
        let mut data = vec![0u8; LIDAR_PACKET_SIZE];
        data[42 + 200 + 2] = 0x10;
        data[42 + 200 + 3] = 0x27;
        data[42 + 200 + 4] = 0xF4;
        data[42 + 200 + 5] = 0x01;
        data[42 + 200 + 6] = 99;
        data[1246] = DUAL_RETURN;
        data[1247] = VLP16;

        let packet = decode(&data).unwrap();
        assert_eq!(packet.columns[2].azimuth, 10000);
        assert_eq!(packet.columns[2].channels[0].distance, 500);
        assert_eq!(packet.columns[2].channels[0].reflectivity, 99);
        assert_eq!(packet.return_mode, ReturnMode::Dual);
        assert_eq!(packet.model(), LidarModel::Vlp16);
    }

    #[test]
    fn test_zero_distance_packet() {
        let data = PacketBuilder::new(VLP32C).azimuths(0, 20).build();
        assert_eq!(decode(&data).unwrap().return_count(), 0);
    }

    #[test]
    fn test_configurable_dual_sentinel() {
        let data = PacketBuilder::new(VLP32C).return_mode(0x57).build();
        assert_eq!(decode(&data).unwrap().return_mode, ReturnMode::Single);

        let decoder = PacketDecoder::new(PacketConfig::new([0x39, 0x57]));
        assert_eq!(decoder.decode(&data).unwrap().return_mode, ReturnMode::Dual);
    }

    #[test]
    fn test_empty_sentinels_fall_back() {
        assert_eq!(PacketConfig::new([]), PacketConfig::default());
        assert_eq!(PacketConfig::new([0x57, 0x39, 0x57]).dual_return_sentinels(), &[
            0x39, 0x57
        ]);
    }

    #[test]
    fn test_builder_header_parses() {
        let data = PacketBuilder::new(VLP16).source([10, 0, 0, 7]).build();
        let sliced = etherparse::SlicedPacket::from_ethernet(&data).unwrap();
        match sliced.net {
            Some(etherparse::NetSlice::Ipv4(ipv4)) => {
                assert_eq!(ipv4.header().source(), [10, 0, 0, 7]);
            }
            other => panic!("unexpected net slice {:?}", other),
        }
        match sliced.transport {
            Some(etherparse::TransportSlice::Udp(udp)) => {
                assert_eq!(udp.destination_port(), 2368);
                assert_eq!(udp.payload().len(), 1206);
            }
            other => panic!("unexpected transport slice {:?}", other),
        }
    }
}
