// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Extrinsic sensor calibration and camera views.
//!
//! A calibration file maps lidar source addresses to their mounting pose and
//! names the cameras whose field of view bounds the elevation raster.
//! Angles are hundredths of a degree, translations millimetres.
//!
//! ```json
//! {
//!   "lidars": {
//!     "192.168.1.202": {
//!       "rotation": { "pitch": -11, "roll": 3588, "yaw": 96 },
//!       "translation": { "x": 698.224, "y": -409.333, "z": 24.5121 }
//!     }
//!   },
//!   "cameras": {
//!     "front": { "direction": 0, "field_of_view": 8200 }
//!   }
//! }
//! ```

use crate::{angles::AZIMUTH_UNITS, lidar::Error};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

/// Mounting rotation in hundredths of a degree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rotation {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Mounting offset in millimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Sensor-to-vehicle transform of one lidar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extrinsics {
    pub rotation: Rotation,
    pub translation: Translation,
}

impl Extrinsics {
    pub fn new(rotation: Rotation, translation: Translation) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Rotation matrix composed as yaw (Z), then pitch (Y), then roll (X).
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let (sa, ca) = (self.rotation.yaw / 100.0).to_radians().sin_cos();
        let (sb, cb) = (self.rotation.pitch / 100.0).to_radians().sin_cos();
        let (sc, cc) = (self.rotation.roll / 100.0).to_radians().sin_cos();
        [
            [ca * cb, ca * sb * sc - sa * cc, ca * sb * cc + sa * sc],
            [sa * cb, sa * sb * sc + ca * cc, sa * sb * cc - ca * sc],
            [-sb, cb * sc, cb * cc],
        ]
    }

    /// Rotate then translate a sensor-frame point.
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        if self.is_identity() {
            return point;
        }
        let m = self.matrix();
        let t = [self.translation.x, self.translation.y, self.translation.z];
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row][0] * point[0] + m[row][1] * point[1] + m[row][2] * point[2] + t[row];
        }
        out
    }
}

/// Horizontal field of view of a camera, hundredths of a degree.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    /// Optical axis azimuth
    pub direction: i32,
    pub field_of_view: u32,
}

impl CameraView {
    /// Start and end azimuth of the view, both in `[0, 36000)`.
    pub fn azimuth_range(&self) -> (u16, u16) {
        let half = (self.field_of_view / 2) as i32;
        let units = AZIMUTH_UNITS as i32;
        let start = (self.direction - half).rem_euclid(units);
        let end = (self.direction + half).rem_euclid(units);
        (start as u16, end as u16)
    }

    /// Position of `azimuth` across the view, `0.0` at the start edge and
    /// `1.0` at the end edge; `None` outside the view.
    pub fn locate(&self, azimuth: u16) -> Option<f64> {
        let span = self.field_of_view.min(AZIMUTH_UNITS as u32);
        if span == 0 {
            return None;
        }
        let (start, _) = self.azimuth_range();
        let units = AZIMUTH_UNITS as u32;
        let relative = (azimuth as u32 % units + units - start as u32) % units;
        (relative <= span).then(|| relative as f64 / span as f64)
    }
}

/// Calibration of a multi-sensor rig.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Extrinsics by lidar source address
    pub lidars: HashMap<String, Extrinsics>,
    /// Cameras by name
    pub cameras: HashMap<String, CameraView>,
}

impl Default for Calibration {
    fn default() -> Self {
        let cameras = HashMap::from([
            (
                "front".to_string(),
                CameraView {
                    direction: 0,
                    field_of_view: 8200,
                },
            ),
            (
                "right".to_string(),
                CameraView {
                    direction: 9000,
                    field_of_view: 30000,
                },
            ),
        ]);
        Self {
            lidars: HashMap::new(),
            cameras,
        }
    }
}

impl Calibration {
    /// Load a calibration JSON file.
    ///
    /// Sections missing from the file are empty; the built-in cameras are
    /// kept unless the file defines a camera of the same name.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded: Calibration = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self::default().merged(loaded))
    }

    fn merged(mut self, other: Calibration) -> Self {
        self.lidars.extend(other.lidars);
        self.cameras.extend(other.cameras);
        self
    }

    /// Extrinsics of a source, identity when unknown.
    pub fn extrinsics(&self, address: &str) -> Extrinsics {
        self.lidars.get(address).copied().unwrap_or_default()
    }

    pub fn camera(&self, name: &str) -> Result<CameraView, Error> {
        self.cameras
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("unknown camera '{}'", name)))
    }
}
