// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Angle and timing correction for the VLP-16 and VLP-32C.
//!
//! Azimuths are carried as hundredths of a degree in `[0, 36000)`, the unit
//! used on the wire. Elevation and azimuth offset tables are stored in
//! thousandths of a degree and converted to degrees on lookup.
//!
//! ```ignore
//! let table = AngleTable::new();
//! let azimuth = precise_azimuth(35900, 100, 5, VLP32C)?;
//! let elevation = table.elevation_degrees(VLP32C, 5)?;
//! let [x, y, z] = to_cartesian(1000.0, azimuth, elevation, 0.0);
//! ```

use crate::{
    lidar::{Error, LidarModel, ReturnMode, VLP16, VLP32C},
    velodyne::{CHANNELS_PER_COLUMN, COLUMNS_PER_PACKET},
};

/// Azimuth units per revolution (hundredths of a degree).
pub const AZIMUTH_UNITS: u16 = 36000;

/// Duration of one full firing cycle in microseconds.
pub const FIRING_CYCLE_US: f64 = 55.296;

/// Spacing between consecutive laser firings in microseconds.
pub const FIRING_SPACING_US: f64 = 2.304;

/// VLP-16 elevation per laser, thousandths of a degree.
pub const VLP16_ELEVATION: [i32; 16] = [
    -15000, 1000, -13000, 3000, -11000, 5000, -9000, 7000, -7000, 9000, -5000, 11000, -3000,
    13000, -1000, 15000,
];

/// VLP-32C elevation per laser, thousandths of a degree.
pub const VLP32C_ELEVATION: [i32; 32] = [
    -25000, -1000, -1667, -15639, -11310, 0, -667, -8843, -7254, 333, -333, -6148, -5333, 1333,
    667, -4000, -4667, 1667, 1000, -3667, -3333, 3333, 2333, -2667, -3000, 7000, 4667, -2333,
    -2000, 15000, 10333, -1333,
];

/// VLP-32C horizontal offset per laser, thousandths of a degree.
pub const VLP32C_AZIMUTH_OFFSET: [i32; 32] = [
    1400, -4200, 1400, -1400, 1400, -1400, 4200, -1400, 1400, -4200, 1400, -1400, 4200, -1400,
    4200, -1400, 1400, 4200, 1400, -4200, 4200, -1400, 1400, -1400, 1400, -1400, 1400, -4200,
    4200, -1400, 1400, -1400,
];

/// Forward azimuth difference from `curr` to `next`, wrapping at 36000.
///
/// Inputs outside `[0, 36000)` are reduced modulo 36000 first, so the
/// result is always in `[0, 36000)` and `azimuth_gap(a, a) == 0`.
pub fn azimuth_gap(curr: u16, next: u16) -> u16 {
    let curr = curr % AZIMUTH_UNITS;
    let next = next % AZIMUTH_UNITS;
    if next >= curr {
        next - curr
    } else {
        AZIMUTH_UNITS - curr + next
    }
}

/// Interpolate the firing azimuth of a laser inside its column.
///
/// The column azimuth marks the first firing; later lasers are spread over
/// the gap to the next column according to the model's firing sequence.
///
/// # Arguments
///
/// * `curr` - Azimuth of the laser's column
/// * `next` - Azimuth of the following column
/// * `laser_id` - Channel slot within the column (0..32)
/// * `product_id` - Product ID byte of the packet
pub fn precise_azimuth(curr: u16, next: u16, laser_id: u8, product_id: u8) -> Result<u16, Error> {
    if laser_id as usize >= CHANNELS_PER_COLUMN {
        return Err(Error::InvalidLaser(laser_id));
    }
    let gap = azimuth_gap(curr, next) as f64;
    let laser = laser_id as f64;
    let offset = match product_id {
        VLP32C => {
            // Lasers fire in pairs, 24 firing slots per column.
            let pair = ((1 + laser_id) / 2) as f64;
            gap * pair / 24.0
        }
        VLP16 if laser_id < 16 => gap * laser / 24.0,
        VLP16 => gap * ((laser - 16.0) + 24.0) / 48.0,
        other => return Err(Error::UnsupportedModel(other)),
    };
    let azimuth = (curr % AZIMUTH_UNITS) as u32 + offset.round() as u32;
    Ok((azimuth % AZIMUTH_UNITS as u32) as u16)
}

/// Project a polar return into the sensor frame, in millimetres.
///
/// `+Y` points along azimuth zero, `+X` along azimuth 90 degrees and `+Z` up.
pub fn to_cartesian(
    distance_mm: f64,
    precise_azimuth: u16,
    elevation_deg: f64,
    azimuth_offset_deg: f64,
) -> [f64; 3] {
    let azimuth = (azimuth_offset_deg + precise_azimuth as f64 / 100.0).to_radians();
    let elevation = elevation_deg.to_radians();
    let horizontal = distance_mm * elevation.cos();
    [
        horizontal * azimuth.sin(),
        horizontal * azimuth.cos(),
        distance_mm * elevation.sin(),
    ]
}

/// Spherical coordinates of a point in a (possibly calibrated) frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spherical {
    /// Range in millimetres
    pub radius: f64,
    /// Azimuth in degrees, `[0, 360)`, clockwise from `+Y`
    pub azimuth_deg: f64,
    /// Elevation above the horizontal plane in degrees
    pub elevation_deg: f64,
}

/// Inverse of [`to_cartesian`] for points that have been moved by an
/// extrinsic transform.
pub fn to_spherical([x, y, z]: [f64; 3]) -> Spherical {
    let radius = (x * x + y * y + z * z).sqrt();
    let azimuth_deg = x.atan2(y).to_degrees().rem_euclid(360.0);
    let elevation_deg = if radius > 0.0 {
        (z / radius).asin().to_degrees()
    } else {
        0.0
    };
    Spherical {
        radius,
        azimuth_deg,
        elevation_deg,
    }
}

/// Firing time offsets for every (laser, column) slot of one model and
/// return mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingTable {
    offsets: [[u32; COLUMNS_PER_PACKET]; CHANNELS_PER_COLUMN],
}

impl TimingTable {
    /// Build the table for a supported model.
    pub fn new(model: LidarModel, mode: ReturnMode) -> Result<Self, Error> {
        match model {
            LidarModel::Vlp16 => Ok(Self::compute(true, mode)),
            LidarModel::Vlp32c => Ok(Self::compute(false, mode)),
            other => Err(Error::UnsupportedModel(other.product_id())),
        }
    }

    fn compute(sixteen_channel: bool, mode: ReturnMode) -> Self {
        let mut offsets = [[0u32; COLUMNS_PER_PACKET]; CHANNELS_PER_COLUMN];
        for (laser, row) in offsets.iter_mut().enumerate() {
            for (column, slot) in row.iter_mut().enumerate() {
                // Dual return repeats each firing in two adjacent columns.
                let column = match mode {
                    ReturnMode::Single => column,
                    ReturnMode::Dual => column / 2,
                };
                let (block, point) = if sixteen_channel {
                    (column * 2 + laser / 16, laser % 16)
                } else {
                    (column, laser / 2)
                };
                let micros = FIRING_CYCLE_US * block as f64 + FIRING_SPACING_US * point as f64;
                *slot = micros.round() as u32;
            }
        }
        Self { offsets }
    }

    /// Offset in microseconds from the packet timestamp.
    pub fn offset(&self, laser_id: u8, column: u8) -> Result<u32, Error> {
        self.offsets
            .get(laser_id as usize)
            .ok_or(Error::InvalidLaser(laser_id))?
            .get(column as usize)
            .copied()
            .ok_or_else(|| Error::Config(format!("firing column {} out of range", column)))
    }
}

/// Per-model correction tables, built once and shared read-only by all
/// decode workers.
#[derive(Clone, Debug)]
pub struct AngleTable {
    vlp16_single: TimingTable,
    vlp16_dual: TimingTable,
    vlp32_single: TimingTable,
    vlp32_dual: TimingTable,
}

impl Default for AngleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AngleTable {
    pub fn new() -> Self {
        Self {
            vlp16_single: TimingTable::compute(true, ReturnMode::Single),
            vlp16_dual: TimingTable::compute(true, ReturnMode::Dual),
            vlp32_single: TimingTable::compute(false, ReturnMode::Single),
            vlp32_dual: TimingTable::compute(false, ReturnMode::Dual),
        }
    }

    /// Vertical angle of a laser in degrees.
    pub fn elevation_degrees(&self, product_id: u8, laser_id: u8) -> Result<f64, Error> {
        if laser_id as usize >= CHANNELS_PER_COLUMN {
            return Err(Error::InvalidLaser(laser_id));
        }
        let millidegrees = match product_id {
            VLP16 => VLP16_ELEVATION[laser_id as usize % VLP16_ELEVATION.len()],
            VLP32C => VLP32C_ELEVATION[laser_id as usize],
            other => return Err(Error::UnsupportedModel(other)),
        };
        Ok(millidegrees as f64 / 1000.0)
    }

    /// Horizontal offset of a laser in degrees, zero for the VLP-16.
    pub fn azimuth_offset_degrees(&self, product_id: u8, laser_id: u8) -> Result<f64, Error> {
        if laser_id as usize >= CHANNELS_PER_COLUMN {
            return Err(Error::InvalidLaser(laser_id));
        }
        match product_id {
            VLP16 => Ok(0.0),
            VLP32C => Ok(VLP32C_AZIMUTH_OFFSET[laser_id as usize] as f64 / 1000.0),
            other => Err(Error::UnsupportedModel(other)),
        }
    }

    /// Firing time of a laser relative to its packet timestamp.
    pub fn timing_offset_micros(
        &self,
        product_id: u8,
        laser_id: u8,
        column: u8,
        mode: ReturnMode,
    ) -> Result<u32, Error> {
        let table = match (product_id, mode) {
            (VLP16, ReturnMode::Single) => &self.vlp16_single,
            (VLP16, ReturnMode::Dual) => &self.vlp16_dual,
            (VLP32C, ReturnMode::Single) => &self.vlp32_single,
            (VLP32C, ReturnMode::Dual) => &self.vlp32_dual,
            (other, _) => return Err(Error::UnsupportedModel(other)),
        };
        table.offset(laser_id, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gap_wraps() {
        assert_eq!(azimuth_gap(35900, 100), 200);
        assert_eq!(azimuth_gap(100, 300), 200);
        assert_eq!(azimuth_gap(0, 35999), 35999);
        assert_eq!(azimuth_gap(1234, 1234), 0);
    }

    #[test]
    fn test_precise_azimuth_first_laser() {
        assert_eq!(precise_azimuth(1000, 1040, 0, VLP32C).unwrap(), 1000);
        assert_eq!(precise_azimuth(1000, 1040, 0, VLP16).unwrap(), 1000);
    }

    #[test]
    fn test_precise_azimuth_vlp32_pairs() {
        // Lasers 1 and 2 share a firing slot.
        let a = precise_azimuth(0, 240, 1, VLP32C).unwrap();
        let b = precise_azimuth(0, 240, 2, VLP32C).unwrap();
        assert_eq!(a, 10);
        assert_eq!(a, b);
        assert_eq!(precise_azimuth(0, 240, 31, VLP32C).unwrap(), 160);
    }

    #[test]
    fn test_precise_azimuth_vlp16_second_half() {
        assert_eq!(precise_azimuth(0, 48, 15, VLP16).unwrap(), 30);
        assert_eq!(precise_azimuth(0, 48, 16, VLP16).unwrap(), 24);
        assert_eq!(precise_azimuth(0, 48, 31, VLP16).unwrap(), 39);
    }

    #[test]
    fn test_precise_azimuth_wraps() {
        assert_eq!(precise_azimuth(35990, 30, 31, VLP32C).unwrap(), 17);
    }

    #[test]
    fn test_precise_azimuth_monotonic() {
        let mut last = 0;
        for laser in 0..32u8 {
            let azimuth = precise_azimuth(0, 100, laser, VLP32C).unwrap();
            assert!(azimuth >= last, "laser {} went backwards", laser);
            assert!(azimuth <= 100);
            last = azimuth;
        }
    }

    #[test]
    fn test_precise_azimuth_unsupported() {
        assert!(matches!(
            precise_azimuth(0, 100, 0, 0x21),
            Err(Error::UnsupportedModel(0x21))
        ));
        assert!(matches!(
            precise_azimuth(0, 100, 32, VLP32C),
            Err(Error::InvalidLaser(32))
        ));
    }

    #[test]
    fn test_elevation_lookup() {
        let table = AngleTable::new();
        assert_eq!(table.elevation_degrees(VLP32C, 5).unwrap(), 0.0);
        assert_eq!(table.elevation_degrees(VLP32C, 0).unwrap(), -25.0);
        assert_eq!(table.elevation_degrees(VLP32C, 29).unwrap(), 15.0);
        assert_eq!(table.elevation_degrees(VLP16, 0).unwrap(), -15.0);
        assert_eq!(table.elevation_degrees(VLP16, 17).unwrap(), 1.0);
        assert!(table.elevation_degrees(0xA1, 0).is_err());
    }

    #[test]
    fn test_azimuth_offset_lookup() {
        let table = AngleTable::new();
        assert_eq!(table.azimuth_offset_degrees(VLP32C, 1).unwrap(), -4.2);
        assert_eq!(table.azimuth_offset_degrees(VLP16, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_cartesian_forward() {
        let [x, y, z] = to_cartesian(1000.0, 0, 0.0, 0.0);
        assert!(x.abs() < 1e-9);
        assert!((y - 1000.0).abs() < 1e-9);
        assert!(z.abs() < 1e-9);
    }

    #[test]
    fn test_cartesian_right_and_up() {
        let [x, y, _] = to_cartesian(1000.0, 9000, 0.0, 0.0);
        assert!((x - 1000.0).abs() < 1e-9);
        assert!(y.abs() < 1e-9);

        let [_, _, z] = to_cartesian(1000.0, 0, 90.0, 0.0);
        assert!((z - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_spherical_inverse() {
        let point = to_cartesian(2500.0, 13500, -10.0, 0.0);
        let s = to_spherical(point);
        assert!((s.radius - 2500.0).abs() < 1e-6);
        assert!((s.azimuth_deg - 135.0).abs() < 1e-6);
        assert!((s.elevation_deg + 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_timing_single_vlp32() {
        let table = AngleTable::new();
        assert_eq!(
            table
                .timing_offset_micros(VLP32C, 0, 0, ReturnMode::Single)
                .unwrap(),
            0
        );
        // Block 1, point 1: 55.296 + 2.304 = 57.6
        assert_eq!(
            table
                .timing_offset_micros(VLP32C, 2, 1, ReturnMode::Single)
                .unwrap(),
            58
        );
        // Block 11, point 15: 608.256 + 34.56
        assert_eq!(
            table
                .timing_offset_micros(VLP32C, 31, 11, ReturnMode::Single)
                .unwrap(),
            643
        );
    }

    #[test]
    fn test_timing_single_vlp16() {
        let table = AngleTable::new();
        // Second firing sequence of column 0 is block 1.
        assert_eq!(
            table
                .timing_offset_micros(VLP16, 16, 0, ReturnMode::Single)
                .unwrap(),
            55
        );
        assert_eq!(
            table
                .timing_offset_micros(VLP16, 15, 1, ReturnMode::Single)
                .unwrap(),
            145
        );
    }

    #[test]
    fn test_timing_dual_pairs_columns() {
        let table = AngleTable::new();
        for laser in 0..32 {
            for column in (0..12).step_by(2) {
                let a = table
                    .timing_offset_micros(VLP32C, laser, column, ReturnMode::Dual)
                    .unwrap();
                let b = table
                    .timing_offset_micros(VLP32C, laser, column + 1, ReturnMode::Dual)
                    .unwrap();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_timing_table_unsupported() {
        assert!(TimingTable::new(LidarModel::Vls128, ReturnMode::Single).is_err());
        let table = TimingTable::new(LidarModel::Vlp32c, ReturnMode::Single).unwrap();
        assert!(table.offset(0, 12).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn prop_gap_in_range(curr in any::<u16>(), next in any::<u16>()) {
            prop_assert!(azimuth_gap(curr, next) < AZIMUTH_UNITS);
        }

        #[test]
        fn prop_gap_self_is_zero(a in 0u16..36000) {
            prop_assert_eq!(azimuth_gap(a, a), 0);
        }

        #[test]
        fn prop_precise_azimuth_in_range(
            curr in 0u16..36000,
            step in 0u16..400,
            laser in 0u8..32,
            vlp16 in any::<bool>(),
        ) {
            let product = if vlp16 { VLP16 } else { VLP32C };
            let next = (curr + step) % AZIMUTH_UNITS;
            let azimuth = precise_azimuth(curr, next, laser, product).unwrap();
            prop_assert!(azimuth < AZIMUTH_UNITS);
            prop_assert!(azimuth_gap(curr, azimuth) <= step);
        }
    }
}
