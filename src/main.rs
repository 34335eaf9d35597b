// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser as _;
use edgefirst_pcapdecoder::{
    Error, PcapSource,
    angles::AngleTable,
    calibration::Calibration,
    pcap_source::{CaptureStats, DISCOVERY_THRESHOLD, discover_sources},
    raster::{ElevationSink, ElevationView, TopDownSink, TopDownView},
    sink::{FrameSink, JsonSink},
    worker::{DecodeOptions, decode_capture},
};
use std::{fs, path::Path, time::Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(args.rust_log),
        )
        .init();

    if !args.pcap.is_file() {
        return Err(Error::SourceOpen {
            path: args.pcap.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "capture file not found"),
        }
        .into());
    }

    if args.stats_only {
        let mut source = PcapSource::open(&args.pcap)?;
        let stats = CaptureStats::collect(&mut source)?;
        if source.truncated() {
            warn!("capture is truncated, counts cover the complete records only");
        }
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    prepare_output_dir(&args.output_path, args.mkdirp)?;

    let mut options = DecodeOptions::try_from(&args)?;
    if options.sources.is_none() {
        let mut source = PcapSource::open(&args.pcap)?;
        let sources = discover_sources(&mut source, DISCOVERY_THRESHOLD)?;
        if sources.is_empty() {
            warn!("no lidar sources found in {}", args.pcap.display());
            return Ok(());
        }
        info!(sources = ?sources, "discovered lidar sources");
        options.sources = Some(sources);
    }

    let calibration = match &args.calibration {
        Some(path) => Calibration::from_file(path)?,
        None => Calibration::default(),
    };
    let table = AngleTable::new();

    let mut sinks: Vec<Box<dyn FrameSink + '_>> = Vec::new();
    if args.json {
        sinks.push(Box::new(JsonSink::new(
            &args.output_path,
            &table,
            &calibration,
        )));
    }
    if args.png {
        sinks.push(Box::new(TopDownSink::new(
            &args.output_path,
            TopDownView::default(),
            &table,
            &calibration,
        )));
    }
    if let Some(camera) = &args.elevation {
        let view = ElevationView {
            width: args.elevation_size[0],
            height: args.elevation_size[1],
            ..Default::default()
        };
        sinks.push(Box::new(ElevationSink::new(
            &args.output_path,
            calibration.camera(camera)?,
            view,
            &table,
            &calibration,
        )));
    }
    if !args.any_output() {
        info!("no output selected, frames are decoded and counted only");
    }

    info!(
        pcap = %args.pcap.display(),
        workers = options.plan.total_workers(),
        start = options.plan.start_frame(),
        end = options.plan.end_frame(),
        "decoding"
    );
    let started = Instant::now();
    let report = decode_capture(&options, |_| PcapSource::open(&args.pcap), sinks)?;
    let stats = report.stats();

    debug!("{}", serde_json::to_string(&stats)?);
    info!(
        frames = report.writer.frames,
        write_failures = report.writer.failures,
        lidar_packets = stats.lidar_packets,
        elapsed = ?started.elapsed(),
        "decode complete"
    );
    if stats.unsupported_points > 0 {
        warn!(
            points = stats.unsupported_points,
            "points from unsupported lidar models were skipped"
        );
    }

    let failed = report.failed_workers();
    if !failed.is_empty() {
        return Err(Error::WorkersFailed(failed).into());
    }
    Ok(())
}

fn prepare_output_dir(path: &Path, mkdirp: bool) -> Result<(), Error> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(Error::OutputDir {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    if !mkdirp {
        return Err(Error::OutputDir {
            path: path.to_path_buf(),
            reason: "does not exist, pass --mkdirp to create it".to_string(),
        });
    }
    fs::create_dir_all(path).map_err(|e| Error::OutputDir {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), "created output directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(prepare_output_dir(dir.path(), false).is_ok());

        let nested = dir.path().join("a/b");
        assert!(matches!(
            prepare_output_dir(&nested, false),
            Err(Error::OutputDir { .. })
        ));
        assert!(prepare_output_dir(&nested, true).is_ok());
        assert!(nested.is_dir());

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(prepare_output_dir(&file, true).is_err());
    }
}
