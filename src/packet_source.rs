// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for the decode workers.
//!
//! A [`PacketSource`] yields captured link-layer frames in capture order,
//! together with the source address of the sensor that sent them. Each
//! worker owns its own source, so implementations never share a cursor.
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_pcapdecoder::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::new(packets);
//!
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     let received = source.recv(&mut buf)?;
//!     // Process buf[..received.len] from received.source
//! }
//! ```

use crate::lidar::Error;
use etherparse::{NetSlice, SlicedPacket};

/// Metadata of a received packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received {
    /// Number of bytes copied into the caller's buffer
    pub len: usize,
    /// IP source address, `None` when the frame headers do not parse
    pub source: Option<String>,
}

/// Trait for packet sources.
///
/// Implementations provide packets from capture files or test data.
pub trait PacketSource: Send {
    /// Receive the next packet into the provided buffer.
    ///
    /// Packets longer than the buffer are truncated.
    ///
    /// # Returns
    /// - `Ok(Received)` - Length copied and source address
    /// - `Err` - I/O or source error, `UnexpectedEof` once exhausted
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, Error>;

    /// Check if more packets are available.
    fn has_more(&self) -> bool;
}

/// Extract the IP source address from an Ethernet frame.
///
/// Returns `None` for frames that are not IPv4 or IPv6.
pub fn source_address(frame: &[u8]) -> Option<String> {
    let packet = SlicedPacket::from_ethernet(frame).ok()?;
    match packet.net? {
        NetSlice::Ipv4(ipv4) => Some(ipv4.header().source_addr().to_string()),
        NetSlice::Ipv6(ipv6) => Some(ipv6.header().source_addr().to_string()),
    }
}

/// In-memory source replaying captured frames, for tests and benches.
///
/// Source addresses are parsed from each frame's headers, exactly as a
/// capture reader would.
pub struct TestSource {
    frames: Vec<Vec<u8>>,
    next: usize,
}

impl TestSource {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self { frames, next: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl PacketSource for TestSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, Error> {
        let Some(frame) = self.frames.get(self.next) else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "test source exhausted",
            )));
        };
        self.next += 1;

        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(Received {
            len,
            source: source_address(frame),
        })
    }

    fn has_more(&self) -> bool {
        self.next < self.frames.len()
    }
}
