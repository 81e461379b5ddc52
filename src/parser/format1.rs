use super::parse_float_prefix;
use crate::models::Point;
use std::borrow::Cow;

const FIELD_COUNT: usize = 10;
const HEADER_MARKER: &str = "Date";
const SALVAGE_PREFIX_CHARS: usize = 10;

/// Writes a column's typed value (or the column's default) into the point.
type FieldDecoder = fn(&mut Point, &str);

/// Positional columns of a format 1 row. Empty or unparsable tokens fall back
/// per column: text and coordinates/distances to `None`, course/speed to `0`,
/// flags to `false`.
const FIELDS: [FieldDecoder; FIELD_COUNT] = [
    set_date,
    set_time,
    set_latitude,
    set_longitude,
    set_course,
    set_speed,
    set_distance_overtaker,
    set_distance_stationary,
    set_confirmed,
    set_private,
];

fn set_date(p: &mut Point, token: &str) {
    p.date = text(token);
}

fn set_time(p: &mut Point, token: &str) {
    p.time = text(token);
}

fn set_latitude(p: &mut Point, token: &str) {
    p.latitude = salvaged_number(token);
}

fn set_longitude(p: &mut Point, token: &str) {
    p.longitude = salvaged_number(token);
}

fn set_course(p: &mut Point, token: &str) {
    p.course = Some(salvaged_number(token).unwrap_or(0.0));
}

fn set_speed(p: &mut Point, token: &str) {
    p.speed = Some(salvaged_number(token).unwrap_or(0.0));
}

fn set_distance_overtaker(p: &mut Point, token: &str) {
    p.distance_overtaker = salvaged_number(token);
}

fn set_distance_stationary(p: &mut Point, token: &str) {
    p.distance_stationary = salvaged_number(token);
}

fn set_confirmed(p: &mut Point, token: &str) {
    p.confirmed = numeric_flag(token);
}

fn set_private(p: &mut Point, token: &str) {
    p.private = numeric_flag(token);
}

fn text(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Full parse first; failing that, the numeric prefix of the first 10 characters.
fn salvaged_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(value) = token.parse::<f64>().ok().filter(|v| v.is_finite()) {
        return Some(value);
    }
    let prefix: String = token.chars().take(SALVAGE_PREFIX_CHARS).collect();
    parse_float_prefix(&prefix)
}

fn numeric_flag(token: &str) -> bool {
    salvaged_number(token).map(|v| v != 0.0).unwrap_or(false)
}

/// Pull-based scanner over a `$`-normalized format 1 body.
///
/// Walks the bytes delimiter by delimiter (`;` between fields, `\n` between
/// rows). A row whose first token is `Date` is a header and is skipped to the
/// end of its line; blank rows yield nothing.
pub struct Format1Points<'a> {
    body: Cow<'a, str>,
    pos: usize,
}

impl<'a> Format1Points<'a> {
    pub fn new(body: Cow<'a, str>) -> Self {
        Self { body, pos: 0 }
    }
}

impl Iterator for Format1Points<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let bytes = self.body.as_bytes();

        while self.pos < bytes.len() {
            let mut point = Point::default();
            let mut field = 0;
            let mut header = false;
            let mut has_content = false;
            let mut start = self.pos;

            loop {
                let mut end = start;
                while end < bytes.len() && bytes[end] != b';' && bytes[end] != b'\n' {
                    end += 1;
                }
                let token = &self.body[start..end];

                if field == 0 && token.trim() == HEADER_MARKER {
                    header = true;
                }
                if !header {
                    if let Some(decoder) = FIELDS.get(field) {
                        decoder(&mut point, token);
                    }
                    has_content |= !token.trim().is_empty();
                }
                field += 1;

                let end_of_line = end >= bytes.len() || bytes[end] == b'\n';
                start = end + 1;
                if end_of_line {
                    self.pos = start;
                    break;
                }
            }

            if header || !has_content {
                continue;
            }

            for decoder in FIELDS.iter().skip(field) {
                decoder(&mut point, "");
            }
            return Some(point);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::normalize_newlines;

    fn parse(body: &str) -> Vec<Point> {
        Format1Points::new(normalize_newlines(body)).collect()
    }

    #[test]
    fn test_header_and_data_lines() {
        let body = "Date;Time;Latitude;Longitude;Course;Speed;Right;Left;Confirmed;insidePrivacyArea;$\
                    12.07.2020;09:23:45;48.7232;9.1234;90.5;5.2;150;255;0;0;$\
                    12.07.2020;09:23:46;48.7233;9.1235;91;5.3;;80;1;1;$";
        let points = parse(body);
        assert_eq!(points.len(), 2);

        let first = &points[0];
        assert_eq!(first.date.as_deref(), Some("12.07.2020"));
        assert_eq!(first.time.as_deref(), Some("09:23:45"));
        assert_eq!(first.position(), Some((48.7232, 9.1234)));
        assert_eq!(first.course, Some(90.5));
        assert_eq!(first.speed, Some(5.2));
        assert_eq!(first.distance_overtaker, Some(150.0));
        assert_eq!(first.distance_stationary, Some(255.0));
        assert!(!first.confirmed);

        let second = &points[1];
        assert_eq!(second.distance_overtaker, None);
        assert!(second.confirmed);
        assert!(second.private);
    }

    #[test]
    fn test_yields_one_point_per_data_line() {
        let mut body = String::from("Date;Time;Lat;Lon\n");
        for i in 0..25 {
            body.push_str(&format!("01.05.2021;10:00:{:02};48.1;9.1;0;0;;;0;0\n", i));
        }
        body.push('\n');
        assert_eq!(parse(&body).len(), 25);
    }

    #[test]
    fn test_salvages_garbled_latitude() {
        let points = parse("01.05.2021;10:00:00;48.7232xx;9.1;0;0;;;0;0\n");
        assert_eq!(points[0].latitude, Some(48.7232));

        let points = parse("01.05.2021;10:00:00;48.72321234567garbage;9.1\n");
        assert_eq!(points[0].latitude, Some(48.7232123));
    }

    #[test]
    fn test_per_field_defaults() {
        let points = parse("01.05.2021;10:00:00;x;;?;;nope;;;\n");
        let p = &points[0];
        assert_eq!(p.latitude, None);
        assert_eq!(p.longitude, None);
        assert_eq!(p.course, Some(0.0));
        assert_eq!(p.speed, Some(0.0));
        assert_eq!(p.distance_overtaker, None);
        assert_eq!(p.distance_stationary, None);
        assert!(!p.confirmed);
        assert!(!p.private);
    }

    #[test]
    fn test_short_row_gets_column_defaults() {
        let points = parse("01.05.2021;10:00:00\n");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].course, Some(0.0));
        assert_eq!(points[0].latitude, None);
    }

    #[test]
    fn test_header_only_and_blank_input() {
        assert!(parse("Date;Time;Latitude$").is_empty());
        assert!(parse("\n\n;;;\n").is_empty());
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let points = parse("01.05.2021;10:00:00;48.1;9.1;0;0;;;0;1\r\n01.05.2021;10:00:01;48.2;9.2;0;0;;;0;0");
        assert_eq!(points.len(), 2);
        assert!(points[0].private);
        assert_eq!(points[1].position(), Some((48.2, 9.2)));
    }

    #[test]
    fn test_fresh_iterator_per_invocation() {
        let body = "01.05.2021;10:00:00;48.1;9.1\n";
        assert_eq!(parse(body).len(), 1);
        assert_eq!(parse(body).len(), 1);
    }
}
