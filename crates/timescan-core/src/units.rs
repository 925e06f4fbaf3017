//! Path length / propagation time conversions.
//!
//! Laser delay is handled in nanoseconds, stage travel in millimetres.
//! The timing-diagnostic stage folds the beam back on itself, so one
//! millimetre of stage travel adds two millimetres of optical path.

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Optical path passes per unit of stage travel.
pub const STAGE_PASSES: f64 = 2.0;

/// Femtoseconds per nanosecond.
pub const FS_PER_NS: f64 = 1.0e6;

/// Convert an optical path length (mm) to a propagation time (ns).
pub fn mm_to_ns(path_length_mm: f64) -> f64 {
    let meters = path_length_mm / 1000.0;
    let seconds = meters / SPEED_OF_LIGHT;
    seconds * 1.0e9
}

/// Convert a propagation time (ns) to an optical path length (mm).
pub fn ns_to_mm(time_ns: f64) -> f64 {
    let seconds = time_ns * 1.0e-9;
    let meters = seconds * SPEED_OF_LIGHT;
    meters * 1000.0
}

/// Convert femtoseconds to nanoseconds.
pub fn fs_to_ns(fs: f64) -> f64 {
    fs / FS_PER_NS
}

/// Stage position (mm) that matches a laser delay (ns).
pub fn stage_position_for_delay(delay_ns: f64, travel_offset_mm: f64) -> f64 {
    ns_to_mm(delay_ns) / STAGE_PASSES + travel_offset_mm
}

/// Laser delay (ns) that a stage position (mm) is matched to.
pub fn delay_for_stage_position(position_mm: f64, travel_offset_mm: f64) -> f64 {
    mm_to_ns((position_mm - travel_offset_mm) * STAGE_PASSES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_nanosecond_is_about_300mm() {
        assert!((ns_to_mm(1.0) - 299.792458).abs() < 1e-9);
        assert!((mm_to_ns(299.792458) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ten_ps_needs_about_1_5mm_of_travel() {
        let pos = stage_position_for_delay(0.01, 0.0);
        assert!((pos - 1.49896229).abs() < 1e-6, "got {pos}");
    }

    #[test]
    fn test_offset_is_additive() {
        let a = stage_position_for_delay(0.001, 0.0);
        let b = stage_position_for_delay(0.001, 12.5);
        assert!((b - a - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_conversions_invert_over_scan_window() {
        let offset = 37.25;
        for i in 0..=200 {
            let d = -1.0e-3 + f64::from(i) * 1.0e-5;
            assert!((mm_to_ns(ns_to_mm(d)) - d).abs() < 1e-9);
            let pos = stage_position_for_delay(d, offset);
            assert!((delay_for_stage_position(pos, offset) - d).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fs_to_ns() {
        assert!((fs_to_ns(500.0) - 5.0e-4).abs() < 1e-15);
    }
}
