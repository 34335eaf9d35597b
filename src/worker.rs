// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Parallel decode passes partitioned by frame index.
//!
//! Every worker reads the whole capture through its own [`PacketSource`] and
//! runs a private [`FrameAssembler`] per source address. Frame `i` of a
//! source is built only by worker `i % total_workers`; the other workers
//! still track boundaries so their frame indices stay in step, but skip
//! point construction.
//!
//! ```text
//!  capture ──► worker 0 ─┐
//!  capture ──► worker 1 ─┼──► kanal (bounded) ──► frame writer ──► sinks
//!  capture ──► worker N ─┘
//! ```
//!
//! Workers share nothing mutable except the [`CancelFlag`]. Frames reach the
//! writer in no particular order across workers.

use crate::{
    assembler::{Advance, FrameAssembler, FrameSelector},
    lidar::{DecodeStats, Error, Frame},
    packet_source::PacketSource,
    sink::{FrameSink, WriterReport, frame_writer},
    velodyne::{PacketConfig, PacketDecoder, PacketKind},
};
use kanal::Sender;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};
use tracing::{debug, error, info, instrument};

/// Default sanity bound on points per frame.
pub const DEFAULT_MAX_FRAME_POINTS: usize = 1_000_000;

/// Receive buffer, large enough for jumbo frames.
const RECV_BUFFER_SIZE: usize = 1 << 16;

/// Worker count used when none is configured.
///
/// Half the available CPUs, reduced to the number of frames in a bounded
/// range when that is smaller, and never less than one.
pub fn default_worker_count(start_frame: i64, end_frame: i64, cpus: usize) -> u8 {
    let mut workers = (cpus / 2).max(1) as i64;
    if end_frame >= 0 {
        let span = end_frame - start_frame;
        if span <= 0 {
            workers = 1;
        } else if span < workers {
            workers = span;
        }
    }
    workers.clamp(1, u8::MAX as i64) as u8
}

/// Static assignment of frame indices to workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    total_workers: u8,
    start_frame: i64,
    end_frame: i64,
}

impl PartitionPlan {
    /// # Arguments
    ///
    /// * `total_workers` - Number of parallel passes, at least 1
    /// * `start_frame` - First frame index to emit
    /// * `end_frame` - Frame index to stop before, negative for unbounded
    pub fn new(total_workers: u8, start_frame: i64, end_frame: i64) -> Result<Self, Error> {
        if total_workers == 0 {
            return Err(Error::Config("at least one worker is required".to_string()));
        }
        if start_frame < 0 {
            return Err(Error::Config(format!(
                "start frame must not be negative, got {}",
                start_frame
            )));
        }
        Ok(Self {
            total_workers,
            start_frame,
            end_frame,
        })
    }

    pub fn total_workers(&self) -> u8 {
        self.total_workers
    }

    pub fn start_frame(&self) -> i64 {
        self.start_frame
    }

    pub fn end_frame(&self) -> i64 {
        self.end_frame
    }

    /// Whether `index` lies in `[start_frame, end_frame)`.
    pub fn in_range(&self, index: u64) -> bool {
        let index = index as i64;
        index >= self.start_frame && (self.end_frame < 0 || index < self.end_frame)
    }

    /// Worker responsible for building frame `index`.
    pub fn owner(&self, index: u64) -> u8 {
        (index % self.total_workers as u64) as u8
    }

    pub fn owns(&self, worker: u8, index: u64) -> bool {
        self.owner(index) == worker && self.in_range(index)
    }

    /// Whether a source whose open frame is `index` has nothing left to emit.
    pub fn is_exhausted(&self, index: u64) -> bool {
        self.end_frame >= 0 && index as i64 >= self.end_frame
    }

    pub fn slot(&self, worker: u8) -> WorkerSlot {
        WorkerSlot { plan: *self, worker }
    }
}

/// Frame selector of one worker.
#[derive(Clone, Copy, Debug)]
pub struct WorkerSlot {
    plan: PartitionPlan,
    worker: u8,
}

impl FrameSelector for WorkerSlot {
    fn wants(&self, frame_index: u64) -> bool {
        self.plan.owns(self.worker, frame_index)
    }
}

/// Shared flag polled by the workers between packets.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settings of one decode pass, shared read-only by all workers.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    pub plan: PartitionPlan,
    pub packet: PacketConfig,
    /// Source addresses to decode; `None` decodes every source seen.
    ///
    /// Without a whitelist a source may first appear anywhere in the
    /// capture, so workers read to the end of the stream. With one they
    /// stop as soon as every listed source has reached the end frame.
    pub sources: Option<Vec<String>>,
    pub max_frame_points: usize,
    /// Frames buffered between the workers and the writer
    pub channel_capacity: usize,
    pub cancel: CancelFlag,
}

impl DecodeOptions {
    pub fn new(plan: PartitionPlan) -> Self {
        Self {
            plan,
            packet: PacketConfig::default(),
            sources: None,
            max_frame_points: DEFAULT_MAX_FRAME_POINTS,
            channel_capacity: 2 * plan.total_workers() as usize,
            cancel: CancelFlag::default(),
        }
    }

    pub fn tracks(&self, address: &str) -> bool {
        self.sources
            .as_ref()
            .is_none_or(|sources| sources.iter().any(|source| source == address))
    }
}

/// Run one partition over `source`, sending owned frames to `tx`.
///
/// Returns when the source is exhausted, every whitelisted source has
/// reached the end frame, or the pass is cancelled. The trailing partial frame of
/// each source is discarded.
#[instrument(skip(options, source, tx))]
pub fn run_worker<S: PacketSource>(
    worker: u8,
    options: &DecodeOptions,
    mut source: S,
    tx: &Sender<Frame>,
) -> Result<DecodeStats, Error> {
    let decoder = PacketDecoder::new(options.packet.clone());
    let slot = options.plan.slot(worker);
    let mut assemblers: HashMap<String, FrameAssembler> = HashMap::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut stats = DecodeStats::default();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    debug!("worker started");

    while source.has_more() {
        if options.cancel.is_cancelled() {
            info!("decode cancelled");
            break;
        }

        let received = source.recv(&mut buf)?;
        stats.packets += 1;
        match PacketKind::classify(received.len) {
            PacketKind::Lidar => stats.lidar_packets += 1,
            PacketKind::Position => {
                stats.position_packets += 1;
                continue;
            }
            PacketKind::Other => {
                stats.other_packets += 1;
                continue;
            }
        }

        let Some(address) = received.source else {
            stats.unattributed_packets += 1;
            continue;
        };
        if !options.tracks(&address) {
            stats.ignored_packets += 1;
            continue;
        }
        if finished.contains(&address) {
            continue;
        }

        let packet = match decoder.decode(&buf[..received.len]) {
            Ok(packet) => packet,
            Err(e) => {
                stats.decode_errors += 1;
                debug!(source = %address, "skipping packet: {}", e);
                continue;
            }
        };

        let assembler = assemblers
            .entry(address.clone())
            .or_insert_with(|| FrameAssembler::new(address.as_str(), options.max_frame_points));
        let Advance::Closed { index, frame } = assembler.push(packet, &slot, &mut stats) else {
            continue;
        };

        if let Some(frame) = frame {
            stats.frames_emitted += 1;
            tx.send(frame).map_err(|_| Error::ChannelClosed)?;
        }

        if options.plan.is_exhausted(index + 1) {
            debug!(source = %address, "source reached end frame");
            finished.insert(address);
            let done = options
                .sources
                .as_ref()
                .is_some_and(|sources| sources.iter().all(|source| finished.contains(source)));
            if done {
                break;
            }
        }
    }

    for (_, assembler) in assemblers.drain() {
        assembler.finish();
    }

    info!(
        packets = stats.packets,
        frames = stats.frames_emitted,
        "worker finished"
    );
    Ok(stats)
}

/// Outcome of one worker.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker: u8,
    pub result: Result<DecodeStats, Error>,
}

/// Outcome of a whole decode pass.
#[derive(Debug)]
pub struct PassReport {
    pub workers: Vec<WorkerReport>,
    pub writer: WriterReport,
}

impl PassReport {
    /// Counters of all workers that completed.
    pub fn stats(&self) -> DecodeStats {
        let mut total = DecodeStats::default();
        for report in &self.workers {
            if let Ok(stats) = &report.result {
                total.merge(stats);
            }
        }
        total
    }

    /// Indices of workers that returned an error or panicked.
    pub fn failed_workers(&self) -> Vec<usize> {
        self.workers
            .iter()
            .filter(|report| report.result.is_err())
            .map(|report| report.worker as usize)
            .collect()
    }
}

/// Decode a capture with `options.plan.total_workers()` parallel passes.
///
/// `open` is called once per worker, on the worker's thread, and must return
/// an independent source positioned at the start of the capture. Closed
/// frames are written to `sinks` by a single writer thread. Blocks until all
/// workers and the writer are done.
#[instrument(skip_all, fields(workers = options.plan.total_workers()))]
pub fn decode_capture<'a, S, F>(
    options: &DecodeOptions,
    open: F,
    sinks: Vec<Box<dyn FrameSink + 'a>>,
) -> Result<PassReport, Error>
where
    S: PacketSource,
    F: Fn(u8) -> Result<S, Error> + Sync,
{
    thread::scope(|scope| {
        let (tx, rx) = kanal::bounded(options.channel_capacity.max(1));

        let writer = thread::Builder::new()
            .name("frame-writer".to_string())
            .spawn_scoped(scope, move || frame_writer(rx, sinks))?;

        let mut handles = Vec::with_capacity(options.plan.total_workers() as usize);
        for worker in 0..options.plan.total_workers() {
            let tx = tx.clone();
            let open = &open;
            let handle = thread::Builder::new()
                .name(format!("decode-{}", worker))
                .spawn_scoped(scope, move || {
                    let source = open(worker)?;
                    run_worker(worker, options, source, &tx)
                })?;
            handles.push((worker, handle));
        }
        drop(tx);

        let workers = handles
            .into_iter()
            .map(|(worker, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(Error::Config(format!("decode worker {} panicked", worker)))
                });
                if let Err(e) = &result {
                    error!(worker, "decode worker failed: {}", e);
                }
                WorkerReport { worker, result }
            })
            .collect();

        let writer = writer.join().unwrap_or_else(|_| {
            error!("frame writer panicked");
            WriterReport {
                frames: 0,
                failures: 1,
            }
        });

        Ok(PassReport { workers, writer })
    })
}
