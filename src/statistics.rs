use crate::models::{Point, Statistics};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// Legs longer than this are GPS gaps or glitches and don't count towards length.
pub const DEFAULT_MAX_LEG_METERS: f64 = 100.0;

const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;
/// Recordings carry local wall-clock time; the legacy convention is a fixed UTC+2.
const RECORDING_UTC_OFFSET_SECS: i32 = 2 * 3600;
const RECORDING_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Great-circle distance in meters between two `(lat, lon)` positions in degrees.
pub fn haversine_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let delta_lat = (b.0 - a.0).to_radians();
    let delta_lon = (b.1 - a.1).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_MEAN_RADIUS_M * c
}

/// Lengths of consecutive legs between points that have both coordinates.
fn legs(points: &[Point]) -> impl Iterator<Item = f64> + '_ {
    let mut positions = points.iter().filter_map(Point::position);
    let mut previous = positions.next();
    positions.map(move |current| {
        let leg = previous.map(|p| haversine_distance(p, current)).unwrap_or(0.0);
        previous = Some(current);
        leg
    })
}

/// Sum of all legs not longer than `max_leg_meters`.
pub fn measure_track_length(points: &[Point], max_leg_meters: f64) -> f64 {
    legs(points).filter(|&leg| leg <= max_leg_meters).sum()
}

/// Runs of positions separated by discarded legs.
pub fn count_segments(points: &[Point], max_leg_meters: f64) -> u32 {
    if !points.iter().any(|p| p.position().is_some()) {
        return 0;
    }
    1 + legs(points).filter(|&leg| leg > max_leg_meters).count() as u32
}

pub fn count_events(points: &[Point]) -> u64 {
    points.iter().filter(|p| p.confirmed).count() as u64
}

/// Timestamp of the first (or, with `find_end`, last) point carrying both date
/// and time. `None` if there is no such point or its timestamp doesn't parse.
pub fn get_recorded_at(points: &[Point], find_end: bool) -> Option<DateTime<Utc>> {
    let mut stamped = points.iter().filter(|p| p.has_timestamp());
    let point = if find_end {
        stamped.last()
    } else {
        stamped.next()
    }?;

    let composed = format!(
        "{} {}",
        point.date.as_deref()?.trim(),
        point.time.as_deref()?.trim()
    );
    let local = NaiveDateTime::parse_from_str(&composed, RECORDING_TIME_FORMAT).ok()?;
    let offset = FixedOffset::east_opt(RECORDING_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

impl Statistics {
    /// Full statistics for a parsed recording.
    pub fn from_points(points: &[Point], max_leg_meters: f64) -> Self {
        let recorded_at = get_recorded_at(points, false);
        let recorded_until = get_recorded_at(points, true);

        let measurements = points.iter().filter(|p| p.distance_overtaker.is_some());
        let num_measurements = measurements.clone().count() as u64;
        let num_valid = measurements.filter(|p| p.position().is_some()).count() as u64;

        Self {
            recorded_at,
            recorded_until,
            duration: Statistics::duration_between(recorded_at, recorded_until),
            length: measure_track_length(points, max_leg_meters),
            segments: Some(count_segments(points, max_leg_meters)),
            num_events: count_events(points),
            num_measurements,
            num_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Meters per degree of latitude on the mean sphere.
    const M_PER_DEG_LAT: f64 = EARTH_MEAN_RADIUS_M * std::f64::consts::PI / 180.0;

    fn at(lat: f64, lon: f64) -> Point {
        Point {
            latitude: Some(lat),
            longitude: Some(lon),
            ..Default::default()
        }
    }

    fn stamped(date: &str, time: &str) -> Point {
        Point {
            date: Some(date.to_string()),
            time: Some(time.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_haversine_along_meridian() {
        let d = haversine_distance((48.0, 9.0), (48.0 + 10.0 / M_PER_DEG_LAT, 9.0));
        assert!((d - 10.0).abs() < 1e-6, "{}", d);
    }

    #[test]
    fn test_long_leg_is_discarded() {
        let a = at(48.0, 9.0);
        let b = at(48.0 + 10.0 / M_PER_DEG_LAT, 9.0);
        let c = at(48.0 + 160.0 / M_PER_DEG_LAT, 9.0);

        let length = measure_track_length(&[a.clone(), b.clone(), c.clone()], DEFAULT_MAX_LEG_METERS);
        assert!((length - 10.0).abs() < 1e-6, "{}", length);
        assert_eq!(count_segments(&[a, b, c], DEFAULT_MAX_LEG_METERS), 2);
    }

    #[test]
    fn test_max_leg_is_configurable() {
        let a = at(48.0, 9.0);
        let b = at(48.0 + 150.0 / M_PER_DEG_LAT, 9.0);
        let length = measure_track_length(&[a, b], 200.0);
        assert!((length - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_points_without_position_are_skipped() {
        let a = at(48.0, 9.0);
        let gap = Point {
            latitude: Some(0.0),
            ..Default::default()
        };
        let b = at(48.0 + 20.0 / M_PER_DEG_LAT, 9.0);
        let length = measure_track_length(&[a, gap, b], DEFAULT_MAX_LEG_METERS);
        assert!((length - 20.0).abs() < 1e-6);
        assert_eq!(measure_track_length(&[], DEFAULT_MAX_LEG_METERS), 0.0);
        assert_eq!(count_segments(&[], DEFAULT_MAX_LEG_METERS), 0);
    }

    #[test]
    fn test_count_events() {
        let mut flagged = at(48.0, 9.0);
        flagged.confirmed = true;
        assert_eq!(count_events(&[flagged.clone(), at(48.0, 9.0), flagged]), 2);
    }

    #[test]
    fn test_recorded_at_uses_fixed_utc_plus_two() {
        let points = vec![
            Point::default(),
            stamped("01.07.2021", "10:00:00"),
            stamped("01.07.2021", "10:20:30"),
            Point {
                date: Some("01.07.2021".to_string()),
                ..Default::default()
            },
        ];
        let start = get_recorded_at(&points, false).unwrap();
        let end = get_recorded_at(&points, true).unwrap();
        assert_eq!(start.to_rfc3339(), "2021-07-01T08:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2021-07-01T08:20:30+00:00");

        // Winter dates use the same offset.
        let winter = get_recorded_at(&[stamped("01.01.2021", "10:00:00")], false).unwrap();
        assert_eq!(winter.to_rfc3339(), "2021-01-01T08:00:00+00:00");
    }

    #[test]
    fn test_recorded_at_unparsable_is_none() {
        assert_eq!(get_recorded_at(&[stamped("31.02.2021", "10:00:00")], false), None);
        assert_eq!(get_recorded_at(&[Point::default()], true), None);
    }

    #[test]
    fn test_from_points() {
        let mut a = stamped("01.07.2021", "10:00:00");
        a.latitude = Some(48.0);
        a.longitude = Some(9.0);
        a.distance_overtaker = Some(1.2);
        a.confirmed = true;

        let mut b = stamped("01.07.2021", "10:00:05");
        b.distance_overtaker = Some(2.0);

        let stats = Statistics::from_points(&[a, b], DEFAULT_MAX_LEG_METERS);
        assert_eq!(stats.duration, Some(5.0));
        assert_eq!(stats.num_events, 1);
        assert_eq!(stats.num_measurements, 2);
        assert_eq!(stats.num_valid, 1);
        assert_eq!(stats.length, 0.0);
        assert_eq!(stats.segments, Some(1));
    }
}
