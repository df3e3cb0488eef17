use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Three well separated groups of flights; the group index is the provisional label.
pub fn clustered_rows(per_group: usize) -> Vec<(String, Vec<f64>, usize)> {
    let centers = [[0.0, 0.0], [6.0, 0.0], [0.0, 6.0]];
    let mut rows = Vec::new();
    for (group, center) in centers.iter().enumerate() {
        for idx in 0..per_group {
            let jitter = idx as f64 * 0.05;
            rows.push((
                format!("/recorder/export/g{group}_flight{idx:02}.csv"),
                vec![center[0] + jitter, center[1] - jitter],
                group,
            ));
        }
    }
    rows
}

/// Write a feature table in the recorder layout: features, then `label`, then `filename`.
pub fn write_feature_table(path: &Path, rows: &[(String, Vec<f64>, usize)]) {
    let dim = rows.first().map(|(_, features, _)| features.len()).unwrap_or(0);
    let mut text = String::new();
    for idx in 0..dim {
        let _ = write!(text, "feature_{idx},");
    }
    text.push_str("label,filename\n");
    for (filename, features, label) in rows {
        for value in features {
            let _ = write!(text, "{value},");
        }
        let _ = writeln!(text, "{label},{filename}");
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create table parent dirs");
    }
    std::fs::write(path, text).expect("write feature table");
}

/// Write a `filename,label` file.
pub fn write_label_file(path: &Path, rows: &[(&Path, &str)]) {
    let mut text = String::from("filename,label\n");
    for (filename, label) in rows {
        let _ = writeln!(text, "{},{label}", filename.display());
    }
    std::fs::write(path, text).expect("write label file");
}

/// Write a flight recorder export with `preamble` lines before the header.
pub fn write_flight_file(path: &Path, preamble: usize, points: usize) -> PathBuf {
    let mut text = String::new();
    for line in 0..preamble {
        let _ = writeln!(text, "#recorder preamble {line}");
    }
    text.push_str("Lcl Date,AltGPS,Roll,Pitch,HDG,Latitude,Longitude\n");
    for idx in 0..points {
        let _ = writeln!(
            text,
            "2017-05-01,{},{}.5,1.0,{},{},{}",
            1000 + idx * 10,
            idx,
            idx * 3,
            40.0 + idx as f64 * 0.001,
            -75.0 - idx as f64 * 0.001
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create flight parent dirs");
    }
    std::fs::write(path, text).expect("write flight file");
    path.to_path_buf()
}
