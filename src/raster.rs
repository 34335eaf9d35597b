// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PNG rasterization of frames.
//!
//! - [`TopDownSink`]: bird's-eye view, 16-bit grayscale with brightness
//!   proportional to height. Forward (+Y) is at the top of the image.
//! - [`ElevationSink`]: side view through a camera's horizontal field of
//!   view, colour encodes depth. Nearer returns win when they overlap.
//!
//! Coordinates are taken after extrinsic calibration.

use crate::{
    angles::{AZIMUTH_UNITS, AngleTable, to_spherical},
    calibration::{Calibration, CameraView},
    lidar::{Error, Frame},
    sink::{FrameSink, write_atomic},
};
use image::{ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use std::path::PathBuf;
use tracing::debug;

/// Window and resolution of the top-down view, millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TopDownView {
    pub x_range: (i32, i32),
    pub y_range: (i32, i32),
    pub z_range: (i32, i32),
    pub mm_per_pixel: u32,
}

impl Default for TopDownView {
    fn default() -> Self {
        Self {
            x_range: (-10_000, 10_000),
            y_range: (-10_000, 10_000),
            z_range: (-5_000, 10_000),
            mm_per_pixel: 20,
        }
    }
}

impl TopDownView {
    pub fn width(&self) -> u32 {
        ((self.x_range.1 - self.x_range.0).max(0) as u32).div_ceil(self.mm_per_pixel.max(1))
    }

    pub fn height(&self) -> u32 {
        ((self.y_range.1 - self.y_range.0).max(0) as u32).div_ceil(self.mm_per_pixel.max(1))
    }

    /// Pixel and grey level of a point, `None` outside the window.
    pub fn project(&self, x: i32, y: i32, z: i32) -> Option<(u32, u32, u16)> {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let (z0, z1) = self.z_range;
        if x < x0 || x >= x1 || y <= y0 || y > y1 || z < z0 || z > z1 || z1 <= z0 {
            return None;
        }
        let unit = self.mm_per_pixel.max(1) as i64;
        let col = ((x as i64 - x0 as i64) / unit) as u32;
        let row = ((y1 as i64 - y as i64) / unit) as u32;
        let level = 0xFFFF as i64 * (z as i64 - z0 as i64) / (z1 as i64 - z0 as i64);
        Some((
            col.min(self.width().saturating_sub(1)),
            row.min(self.height().saturating_sub(1)),
            level as u16,
        ))
    }
}

/// Renders a top-down PNG per frame, `frame{index}_{address}.png`.
pub struct TopDownSink<'a> {
    dir: PathBuf,
    view: TopDownView,
    table: &'a AngleTable,
    calibration: &'a Calibration,
}

impl<'a> TopDownSink<'a> {
    pub fn new(
        dir: impl Into<PathBuf>,
        view: TopDownView,
        table: &'a AngleTable,
        calibration: &'a Calibration,
    ) -> Self {
        Self {
            dir: dir.into(),
            view,
            table,
            calibration,
        }
    }

    pub fn file_name(frame: &Frame) -> String {
        format!("frame{}_{}.png", frame.index, frame.source)
    }

    pub fn render(&self, frame: &Frame) -> ImageBuffer<Luma<u16>, Vec<u16>> {
        let mut image = ImageBuffer::new(self.view.width(), self.view.height());
        let extrinsics = self.calibration.extrinsics(&frame.source);
        let (records, _) = frame.records(self.table, &extrinsics);
        for record in records {
            if let Some((col, row, level)) = self.view.project(record.x, record.y, record.z) {
                let pixel: &mut Luma<u16> = image.get_pixel_mut(col, row);
                pixel.0[0] = pixel.0[0].max(level);
            }
        }
        image
    }
}

impl FrameSink for TopDownSink<'_> {
    fn name(&self) -> &str {
        "png"
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let image = self.render(frame);
        let path = write_atomic(&self.dir, &Self::file_name(frame), |writer| {
            image.write_to(writer, ImageFormat::Png)?;
            Ok(())
        })?;
        debug!(path = %path.display(), "wrote top-down view");
        Ok(())
    }
}

/// Window and size of the elevation view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElevationView {
    pub width: u32,
    pub height: u32,
    /// Height window in millimetres
    pub height_range: (f64, f64),
    /// Maximum horizontal depth in millimetres
    pub max_depth: f64,
}

impl Default for ElevationView {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 512,
            height_range: (-1500.0, 2500.0),
            max_depth: 10_000.0,
        }
    }
}

impl ElevationView {
    /// Pixel, depth and colour of a point seen through `camera`.
    pub fn project(&self, camera: &CameraView, point: [f64; 3]) -> Option<(u32, u32, f64, Rgb<u8>)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let spherical = to_spherical(point);
        let azimuth =
            (spherical.azimuth_deg * 100.0).round() as u32 % AZIMUTH_UNITS as u32;
        let across = camera.locate(azimuth as u16)?;

        let elevation = spherical.elevation_deg.to_radians();
        let height = spherical.radius * elevation.sin();
        let depth = spherical.radius * elevation.cos();
        let (h0, h1) = self.height_range;
        if height <= h0 || height >= h1 || depth >= self.max_depth {
            return None;
        }

        let col = ((across * self.width as f64) as u32).min(self.width - 1);
        let row = (((h1 - height) / (h1 - h0) * self.height as f64) as u32).min(self.height - 1);
        let colour = ((self.max_depth - depth) * 0xFF_FFFF as f64 / self.max_depth) as u32;
        let rgb = Rgb([(colour >> 16) as u8, (colour >> 8) as u8, colour as u8]);
        Some((col, row, depth, rgb))
    }
}

/// Renders the elevation view of one camera per frame,
/// `{address}-elev{index}.png`.
pub struct ElevationSink<'a> {
    dir: PathBuf,
    camera: CameraView,
    view: ElevationView,
    table: &'a AngleTable,
    calibration: &'a Calibration,
}

impl<'a> ElevationSink<'a> {
    pub fn new(
        dir: impl Into<PathBuf>,
        camera: CameraView,
        view: ElevationView,
        table: &'a AngleTable,
        calibration: &'a Calibration,
    ) -> Self {
        Self {
            dir: dir.into(),
            camera,
            view,
            table,
            calibration,
        }
    }

    pub fn file_name(frame: &Frame) -> String {
        format!("{}-elev{}.png", frame.source, frame.index)
    }

    pub fn render(&self, frame: &Frame) -> RgbImage {
        let mut image = RgbImage::new(self.view.width, self.view.height);
        let mut depths = vec![f64::INFINITY; (self.view.width * self.view.height) as usize];
        let extrinsics = self.calibration.extrinsics(&frame.source);

        for point in &frame.points {
            let Ok(xyz) = point.xyz(self.table) else {
                continue;
            };
            let Some((col, row, depth, rgb)) = self.view.project(&self.camera, extrinsics.apply(xyz))
            else {
                continue;
            };
            let slot = &mut depths[(row * self.view.width + col) as usize];
            if depth < *slot {
                *slot = depth;
                image.put_pixel(col, row, rgb);
            }
        }
        image
    }
}

impl FrameSink for ElevationSink<'_> {
    fn name(&self) -> &str {
        "elevation"
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let image = self.render(frame);
        let path = write_atomic(&self.dir, &Self::file_name(frame), |writer| {
            image.write_to(writer, ImageFormat::Png)?;
            Ok(())
        })?;
        debug!(path = %path.display(), "wrote elevation view");
        Ok(())
    }
}
