// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame sinks and the writer thread that feeds them.
//!
//! Decode workers hand closed frames to a bounded `kanal` channel. A single
//! writer thread drains the channel and passes every frame to each
//! configured [`FrameSink`]. Output files are written to a temporary file in
//! the output directory and renamed into place, so an interrupted run never
//! leaves a truncated frame behind.

use crate::{
    angles::AngleTable,
    calibration::Calibration,
    lidar::{Error, Frame},
};
use kanal::Receiver;
use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, instrument, warn};

/// Consumer of closed frames.
pub trait FrameSink: Send {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Write one frame.
    fn write(&mut self, frame: &Frame) -> Result<(), Error>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Counters of the writer thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Frames received from the workers
    pub frames: u64,
    /// Individual sink writes that failed
    pub failures: u64,
}

/// Drain `rx` until every sender is dropped, writing each frame to every
/// sink. Sink errors are logged and counted; they do not stop the run.
#[instrument(skip_all)]
pub fn frame_writer<'a>(
    rx: Receiver<Frame>,
    mut sinks: Vec<Box<dyn FrameSink + 'a>>,
) -> WriterReport {
    let mut report = WriterReport::default();

    while let Ok(frame) = rx.recv() {
        report.frames += 1;
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.write(&frame) {
                report.failures += 1;
                error!(
                    sink = sink.name(),
                    source = %frame.source,
                    index = frame.index,
                    "frame write failed: {}",
                    e
                );
            }
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.finish() {
            report.failures += 1;
            error!(sink = sink.name(), "sink finish failed: {}", e);
        }
    }

    report
}

/// Write a file by filling a temporary file in `dir` and renaming it to
/// `name` once complete.
pub fn write_atomic<F>(dir: &Path, name: &str, fill: F) -> Result<PathBuf, Error>
where
    F: FnOnce(&mut BufWriter<&mut std::fs::File>) -> Result<(), Error>,
{
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        fill(&mut writer)?;
        writer.flush()?;
    }
    let path = dir.join(name);
    tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
    Ok(path)
}

/// Writes each frame as a JSON array of point records,
/// `frame{index}_{address}.json`.
pub struct JsonSink<'a> {
    dir: PathBuf,
    table: &'a AngleTable,
    calibration: &'a Calibration,
    skipped_points: u64,
}

impl<'a> JsonSink<'a> {
    pub fn new(dir: impl Into<PathBuf>, table: &'a AngleTable, calibration: &'a Calibration) -> Self {
        Self {
            dir: dir.into(),
            table,
            calibration,
            skipped_points: 0,
        }
    }

    pub fn file_name(frame: &Frame) -> String {
        format!("frame{}_{}.json", frame.index, frame.source)
    }

    /// Points that could not be converted to records.
    pub fn skipped_points(&self) -> u64 {
        self.skipped_points
    }
}

impl FrameSink for JsonSink<'_> {
    fn name(&self) -> &str {
        "json"
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let extrinsics = self.calibration.extrinsics(&frame.source);
        let (records, skipped) = frame.records(self.table, &extrinsics);
        self.skipped_points += skipped as u64;

        let path = write_atomic(&self.dir, &Self::file_name(frame), |writer| {
            serde_json::to_writer(writer, &records)?;
            Ok(())
        })?;
        debug!(path = %path.display(), points = records.len(), "wrote frame");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        if self.skipped_points > 0 {
            warn!(
                skipped = self.skipped_points,
                "points without angle correction were left out of the JSON output"
            );
        }
        Ok(())
    }
}
