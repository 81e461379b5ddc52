use super::FORMAT_MARKER_KEY;
use crate::models::Point;
use std::str::Lines;

// Fixed column layout of format 2 rows.
const COL_DATE: usize = 0;
const COL_TIME: usize = 1;
const COL_LATITUDE: usize = 4;
const COL_LONGITUDE: usize = 5;
const COL_COURSE: usize = 7;
const COL_SPEED: usize = 8;
const COL_LEFT: usize = 12;
const COL_RIGHT: usize = 13;
const COL_CONFIRMED: usize = 14;
const COL_PRIVACY: usize = 17;

const HEADER_MARKER: &str = "Date";
const CENTIMETERS_PER_METER: f64 = 100.0;

/// One point per physical line. Unparsable numbers become `None`, no salvage.
pub struct Format2Points<'a> {
    lines: Lines<'a>,
}

impl<'a> Format2Points<'a> {
    pub fn new(body: &'a str) -> Self {
        Self {
            lines: body.lines(),
        }
    }
}

impl Iterator for Format2Points<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        for line in self.lines.by_ref() {
            if line.trim().is_empty() || line.contains(FORMAT_MARKER_KEY) {
                continue;
            }

            let columns: Vec<&str> = line.split(';').map(str::trim).collect();
            if columns.first() == Some(&HEADER_MARKER) {
                continue;
            }

            let column = |index: usize| columns.get(index).copied().unwrap_or("");

            return Some(Point {
                date: text(column(COL_DATE)),
                time: text(column(COL_TIME)),
                latitude: number(column(COL_LATITUDE)),
                longitude: number(column(COL_LONGITUDE)),
                course: number(column(COL_COURSE)),
                speed: number(column(COL_SPEED)),
                distance_overtaker: number(column(COL_LEFT)).map(|cm| cm / CENTIMETERS_PER_METER),
                distance_stationary: number(column(COL_RIGHT)).map(|cm| cm / CENTIMETERS_PER_METER),
                confirmed: flag(column(COL_CONFIRMED)),
                private: flag(column(COL_PRIVACY)),
            });
        }

        None
    }
}

fn text(token: &str) -> Option<String> {
    (!token.is_empty()).then(|| token.to_string())
}

fn number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn flag(token: &str) -> bool {
    token == "1" || token.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Date;Time;Millis;Comment;Latitude;Longitude;Altitude;Course;Speed;HDOP;Satellites;BatteryLevel;Left;Right;Confirmed;Marked;Invalid;InsidePrivacyArea;Factor;Measurements";

    fn body(rows: &[&str]) -> String {
        let mut body = format!("OBSDataFormat=2&OBSFirmwareVersion=v0.3.4\n{}\n", HEADER);
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        body
    }

    #[test]
    fn test_parses_fixed_columns() {
        let body = body(&[
            "02.05.2021;08:00:00;1000;;48.7;9.1;250.5;180;4.5;1.2;9;3.9;152;80;1;;0;0;58;1",
        ]);
        let points: Vec<Point> = Format2Points::new(&body).collect();
        assert_eq!(points.len(), 1);

        let p = &points[0];
        assert_eq!(p.date.as_deref(), Some("02.05.2021"));
        assert_eq!(p.position(), Some((48.7, 9.1)));
        assert_eq!(p.course, Some(180.0));
        assert_eq!(p.speed, Some(4.5));
        assert_eq!(p.distance_overtaker, Some(1.52));
        assert_eq!(p.distance_stationary, Some(0.8));
        assert!(p.confirmed);
        assert!(!p.private);
    }

    #[test]
    fn test_unparsable_numbers_are_none() {
        let body = body(&["02.05.2021;08:00:00;1000;;48.7xx;;;abc;;;;;;;0;;0;true"]);
        let p = Format2Points::new(&body).next().unwrap();
        assert_eq!(p.latitude, None);
        assert_eq!(p.longitude, None);
        assert_eq!(p.course, None);
        assert_eq!(p.speed, None);
        assert_eq!(p.distance_overtaker, None);
        assert!(!p.confirmed);
        assert!(p.private);
    }

    #[test]
    fn test_short_rows_and_blank_lines() {
        let body = body(&["", ";;", "02.05.2021;08:00:01"]);
        let points: Vec<Point> = Format2Points::new(&body).collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].time.as_deref(), Some("08:00:01"));
        assert_eq!(points[1].latitude, None);
    }
}
