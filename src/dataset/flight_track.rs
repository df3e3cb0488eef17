//! Per-flight time series used by display collaborators.
//!
//! Flight recorder exports start with one or two preamble lines before the column
//! header and are Latin-1 encoded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Columns a flight file must provide, in [`FlightTrack`] field order.
pub const TRACK_COLUMNS: [&str; 6] = ["AltGPS", "Roll", "Pitch", "HDG", "Latitude", "Longitude"];

/// Preamble line counts tried before the header, in order.
const HEADER_SKIPS: [usize; 2] = [2, 1];

#[derive(Debug, Error)]
pub enum FlightTrackError {
    #[error("Failed to read flight file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid flight file {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Flight file {path} lacks one of the columns {columns:?}")]
    MissingColumns {
        path: PathBuf,
        columns: [&'static str; 6],
    },
}

/// Numeric columns of one flight; unparsable cells are `NaN`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightTrack {
    pub alt_gps: Vec<f64>,
    pub roll: Vec<f64>,
    pub pitch: Vec<f64>,
    pub heading: Vec<f64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
}

/// Compact description of a track for text displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    pub points: usize,
    pub altitude: Option<(f64, f64)>,
    pub latitude: Option<(f64, f64)>,
    pub longitude: Option<(f64, f64)>,
}

impl FlightTrack {
    pub fn len(&self) -> usize {
        self.alt_gps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alt_gps.is_empty()
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            points: self.len(),
            altitude: finite_range(&self.alt_gps),
            latitude: finite_range(&self.latitude),
            longitude: finite_range(&self.longitude),
        }
    }
}

/// Load the track columns of a single flight file.
pub fn load_flight_track(path: &Path) -> Result<FlightTrack, FlightTrackError> {
    let bytes = std::fs::read(path).map_err(|source| FlightTrackError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    // Latin-1 bytes map one-to-one onto the first 256 code points.
    let text: String = bytes.iter().copied().map(char::from).collect();
    for skip in HEADER_SKIPS {
        if let Some(track) = parse_track(skip_lines(&text, skip), path)? {
            debug!(path = %path.display(), skip, points = track.len(), "Loaded flight track");
            return Ok(track);
        }
    }
    Err(FlightTrackError::MissingColumns {
        path: path.to_path_buf(),
        columns: TRACK_COLUMNS,
    })
}

/// Load each distinct flight once, in first-seen order.
pub fn load_flight_tracks<P: AsRef<Path>>(
    paths: &[P],
) -> Result<Vec<(PathBuf, FlightTrack)>, FlightTrackError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !seen.insert(path.to_path_buf()) {
            continue;
        }
        out.push((path.to_path_buf(), load_flight_track(path)?));
    }
    Ok(out)
}

fn skip_lines(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        match rest.find('\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return "",
        }
    }
    rest
}

/// `Ok(None)` when the header after the skipped lines lacks a track column.
fn parse_track(body: &str, path: &Path) -> Result<Option<FlightTrack>, FlightTrackError> {
    let csv_err = |source| FlightTrackError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let headers = reader.headers().map_err(csv_err)?.clone();
    let Some(positions) = TRACK_COLUMNS
        .iter()
        .map(|name| headers.iter().position(|header| header == *name))
        .collect::<Option<Vec<usize>>>()
    else {
        return Ok(None);
    };

    let mut columns: [Vec<f64>; 6] = Default::default();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        for (column, &pos) in columns.iter_mut().zip(&positions) {
            let value = record
                .get(pos)
                .and_then(|cell| cell.parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            column.push(value);
        }
    }
    let [alt_gps, roll, pitch, heading, latitude, longitude] = columns;
    Ok(Some(FlightTrack {
        alt_gps,
        roll,
        pitch,
        heading,
        latitude,
        longitude,
    }))
}

fn finite_range(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold(None, |range, value| match range {
            None => Some((value, value)),
            Some((lo, hi)) => Some((lo.min(value), hi.max(value))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BODY: &str = "Lcl Date, AltGPS, Roll, Pitch, HDG, Latitude, Longitude\n\
                        2017-03-01, 1200.5, 1.0, 2.0, 270, 40.1, -86.9\n\
                        2017-03-01, 1210.0, , 2.5, 271, 40.2, -86.8\n";

    #[test]
    fn reads_two_line_preamble() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        let text = format!("#airframe_info, log_version=\"1.00\"\n#yyy-mm-dd, ft Baro\n{BODY}");
        std::fs::write(&path, text).unwrap();

        let track = load_flight_track(&path).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.alt_gps, vec![1200.5, 1210.0]);
        assert!(track.roll[1].is_nan());
        let summary = track.summary();
        assert_eq!(summary.altitude, Some((1200.5, 1210.0)));
        assert_eq!(summary.longitude, Some((-86.9, -86.8)));
    }

    #[test]
    fn falls_back_to_one_line_preamble() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        std::fs::write(&path, format!("#airframe_info\n{BODY}")).unwrap();
        let track = load_flight_track(&path).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.heading, vec![270.0, 271.0]);
    }

    #[test]
    fn decodes_latin1_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        let mut bytes = b"#pr\xe9ambule\n#units \xb0\n".to_vec();
        bytes.extend_from_slice(BODY.as_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(load_flight_track(&path).unwrap().len(), 2);
    }

    #[test]
    fn missing_columns_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        std::fs::write(&path, "a\nb\nAltGPS,Roll\n1,2\n").unwrap();
        let err = load_flight_track(&path).unwrap_err();
        assert!(matches!(err, FlightTrackError::MissingColumns { .. }));
    }

    #[test]
    fn loads_each_flight_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        std::fs::write(&path, format!("#a\n#b\n{BODY}")).unwrap();
        let tracks = load_flight_tracks(&[&path, &path]).unwrap();
        assert_eq!(tracks.len(), 1);
    }
}
