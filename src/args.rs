// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_pcapdecoder::{
    Error,
    velodyne::PacketConfig,
    worker::{DecodeOptions, PartitionPlan, default_worker_count},
};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Decode Velodyne lidar captures into per-revolution point clouds", long_about = None)]
pub struct Args {
    /// Capture file to decode, legacy pcap or pcapng.
    #[arg(env = "PCAP_FILE")]
    pub pcap: PathBuf,

    /// Directory receiving the output files.
    #[arg(short, long, env, default_value = ".")]
    pub output_path: PathBuf,

    /// Create the output directory, including parents, if it is missing.
    #[arg(short, long, env)]
    pub mkdirp: bool,

    /// First frame index to output.
    #[arg(short, long, env, default_value = "0")]
    pub start_frame: i64,

    /// Frame index to stop before, -1 for the whole capture.
    #[arg(short, long, env, default_value = "-1", allow_negative_numbers = true)]
    pub end_frame: i64,

    /// Number of parallel decode workers.  Defaults to half the available
    /// CPUs, or one per frame when the frame range is smaller.
    #[arg(short, long, env)]
    pub workers: Option<u8>,

    /// Lidar source addresses to decode, comma separated.  When empty the
    /// sources are discovered from the start of the capture.
    #[arg(short, long, env, value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Write each frame as a JSON array of points.
    #[arg(short, long, env)]
    pub json: bool,

    /// Write a top-down PNG of each frame.
    #[arg(long, env)]
    pub png: bool,

    /// Write an elevation PNG through the named camera's field of view.
    #[arg(long, env, value_name = "CAMERA")]
    pub elevation: Option<String>,

    /// Elevation image size in pixels.
    #[arg(
        long,
        env,
        num_args = 2,
        value_names = ["WIDTH", "HEIGHT"],
        value_delimiter = ' ',
        default_value = "1024 512"
    )]
    pub elevation_size: Vec<u32>,

    /// Print packet statistics of the capture as JSON and exit.
    #[arg(long)]
    pub stats_only: bool,

    /// Calibration JSON with per-source extrinsics and camera views.
    #[arg(long, env)]
    pub calibration: Option<PathBuf>,

    /// Return-mode byte marking dual-return packets, hex or decimal.
    /// May be given more than once for mixed firmware.
    #[arg(long, default_value = "0x39", value_parser = parse_byte)]
    pub dual_sentinel: Vec<u8>,

    /// Upper bound on points kept per frame.
    #[arg(long, env, default_value = "1000000")]
    pub max_frame_points: usize,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

fn parse_byte(value: &str) -> Result<u8, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", value, e))
}

impl Args {
    pub fn total_workers(&self) -> u8 {
        self.workers.unwrap_or_else(|| {
            default_worker_count(self.start_frame, self.end_frame, num_cpus::get())
        })
    }

    pub fn any_output(&self) -> bool {
        self.json || self.png || self.elevation.is_some()
    }
}

impl TryFrom<&Args> for DecodeOptions {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let plan = PartitionPlan::new(args.total_workers(), args.start_frame, args.end_frame)?;
        let mut options = DecodeOptions::new(plan);
        options.packet = PacketConfig::new(args.dual_sentinel.iter().copied());
        options.max_frame_points = args.max_frame_points;
        if !args.channels.is_empty() {
            options.sources = Some(args.channels.clone());
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x39"), Ok(0x39));
        assert_eq!(parse_byte("0X57"), Ok(0x57));
        assert_eq!(parse_byte("57"), Ok(57));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("dual").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["pcapdecoder", "capture.pcap"]).unwrap();
        assert_eq!(args.start_frame, 0);
        assert_eq!(args.end_frame, -1);
        assert_eq!(args.dual_sentinel, vec![0x39]);
        assert_eq!(args.elevation_size, vec![1024, 512]);
        assert!(!args.any_output());

        let options = DecodeOptions::try_from(&args).unwrap();
        assert!(options.sources.is_none());
        assert_eq!(options.packet.dual_return_sentinels(), &[0x39]);
        assert!(options.plan.total_workers() >= 1);
    }

    #[test]
    fn test_options_from_args() {
        let args = Args::try_parse_from([
            "pcapdecoder",
            "capture.pcap",
            "--start-frame",
            "10",
            "--end-frame",
            "13",
            "--channels",
            "192.168.1.201,192.168.1.202",
            "--dual-sentinel",
            "0x39",
            "--dual-sentinel",
            "0x57",
            "--json",
        ])
        .unwrap();
        assert!(args.any_output());

        let options = DecodeOptions::try_from(&args).unwrap();
        assert!(options.plan.total_workers() <= 3);
        assert_eq!(options.plan.start_frame(), 10);
        assert_eq!(options.plan.end_frame(), 13);
        assert_eq!(
            options.sources,
            Some(vec!["192.168.1.201".to_string(), "192.168.1.202".to_string()])
        );
        assert_eq!(options.packet.dual_return_sentinels(), &[0x39, 0x57]);
    }

    #[test]
    fn test_negative_start_rejected() {
        let args =
            Args::try_parse_from(["pcapdecoder", "capture.pcap", "--start-frame=-2"]).unwrap();
        assert!(DecodeOptions::try_from(&args).is_err());
    }
}
