//! Feature tables and flight files read from disk.
//!
//! The feature table is loaded once per session and normalized into a working set of
//! [`FeatureRow`]s; an optional validation file can carve a held-out subset out of it.

pub mod features;
pub mod flight_track;
pub mod validation;

pub use features::{DataLoadError, FeatureRow, FeatureStore, reroot_identifier};
pub use flight_track::{FlightTrack, FlightTrackError, TrackSummary, load_flight_track, load_flight_tracks};
pub use validation::{ValidationError, ValidationSet, split_validation};

/// Header of the column holding the flight identifier.
pub const FILENAME_COLUMN: &str = "filename";
/// Header of the column holding a label (index in feature files, name in label files).
pub const LABEL_COLUMN: &str = "label";
