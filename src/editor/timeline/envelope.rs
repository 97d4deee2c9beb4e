use serde::{Deserialize, Serialize};

use crate::editor::utils::key_generator::key_type;

key_type!(pub struct VolumePointKey(u32));

/// One point of a track's piecewise-linear gain automation curve.
/// `time` is track-relative seconds, `value` a linear gain factor.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct VolumePoint {
    pub key: VolumePointKey,
    pub time: f64,
    pub value: f32,
}

/// Evaluate an envelope at `time`.
///
/// Linear interpolation between points, clamped to the first/last value
/// outside the covered range, `fallback` when the envelope is empty.
/// Points must be sorted by time.
pub fn value_at(points: &[VolumePoint], fallback: f32, time: f64) -> f32 {
    let Some(first) = points.first() else {
        return fallback;
    };
    if time <= first.time {
        return first.value;
    }
    let last = points.last().expect("non-empty envelope has a last point");
    if time >= last.time {
        return last.value;
    }

    // Index of the first point past `time`; bounded by the clamps above.
    let after = points.partition_point(|p| p.time <= time);
    let a = points[after - 1];
    let b = points[after];

    let span = b.time - a.time;
    if span <= f64::EPSILON {
        return b.value;
    }
    let fraction = ((time - a.time) / span) as f32;
    a.value + (b.value - a.value) * fraction
}

/// Insert a point, keeping the envelope sorted by time.
pub fn sorted_insert(points: &mut Vec<VolumePoint>, point: VolumePoint) {
    let index = points.partition_point(|p| p.time <= point.time);
    points.insert(index, point);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(key: u32, time: f64, value: f32) -> VolumePoint {
        VolumePoint {
            key: VolumePointKey(key),
            time,
            value,
        }
    }

    #[test]
    fn empty_envelope_falls_back() {
        assert_eq!(value_at(&[], 0.8, 3.0), 0.8);
    }

    #[test]
    fn interpolates_linearly() {
        let envelope = [point(0, 0.0, 1.0), point(1, 2.0, 0.0)];
        assert_eq!(value_at(&envelope, 1.0, 1.0), 0.5);
        assert_eq!(value_at(&envelope, 1.0, 0.5), 0.75);
    }

    #[test]
    fn exact_at_each_point() {
        let envelope = [point(0, 0.0, 0.2), point(1, 1.0, 0.9), point(2, 3.0, 0.4)];
        for p in &envelope {
            assert_eq!(value_at(&envelope, 1.0, p.time), p.value);
        }
    }

    #[test]
    fn clamped_outside_range() {
        let envelope = [point(0, 1.0, 0.25), point(1, 2.0, 0.75)];
        assert_eq!(value_at(&envelope, 1.0, 0.0), 0.25);
        assert_eq!(value_at(&envelope, 1.0, 5.0), 0.75);
    }

    #[test]
    fn monotonic_between_points() {
        let envelope = [point(0, 0.0, 0.1), point(1, 4.0, 0.9)];
        let mut previous = 0.0;
        for step in 0..=100 {
            let value = value_at(&envelope, 1.0, step as f64 * 0.04);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn sorted_insert_keeps_order() {
        let mut envelope = vec![point(0, 0.0, 1.0), point(1, 2.0, 1.0)];
        sorted_insert(&mut envelope, point(2, 1.0, 0.5));
        let times: Vec<f64> = envelope.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }
}
