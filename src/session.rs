//! Line-oriented labeling session on top of an [`ActiveLearner`].
//!
//! Commands are read one per line; flights offered for labeling are answered with a
//! label index, a label name, `?` to print the flight's track summary, or an empty
//! line to skip.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::active::{ActiveLearner, LearnerError};
use crate::dataset::{TrackSummary, load_flight_tracks};

/// Flights listed per label by the `clusters` command.
const CLUSTER_PREVIEW: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Learner(#[from] LearnerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Labels,
    SetLabels(Vec<String>),
    Start,
    More,
    Clusters,
    Distribution,
    Save(PathBuf),
    Load(PathBuf),
    Restart,
    Show(Vec<String>),
    Model(PathBuf),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let argument = |usage: &str| {
            if rest.is_empty() {
                Err(format!("usage: {usage}"))
            } else {
                Ok(rest.to_string())
            }
        };
        match name {
            "labels" => Ok(Self::Labels),
            "set-labels" => {
                let names: Vec<String> = argument("set-labels <name>,<name>,...")?
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    return Err("set-labels needs at least one name".to_string());
                }
                Ok(Self::SetLabels(names))
            }
            "start" => Ok(Self::Start),
            "more" => Ok(Self::More),
            "clusters" => Ok(Self::Clusters),
            "dist" => Ok(Self::Distribution),
            "save" => Ok(Self::Save(with_csv_extension(&argument("save <file>")?))),
            "load" => Ok(Self::Load(PathBuf::from(argument("load <file>")?))),
            "restart" => Ok(Self::Restart),
            "show" => Ok(Self::Show(
                argument("show <flight> [<flight> ...]")?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            )),
            "model" => Ok(Self::Model(PathBuf::from(argument("model <file>")?))),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("Unknown command {other:?}; type help for a list")),
        }
    }
}

/// Whether the session keeps reading commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Session<R, W> {
    learner: ActiveLearner,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(learner: ActiveLearner, input: R, output: W) -> Self {
        Self {
            learner,
            input,
            output,
        }
    }

    pub fn learner(&self) -> &ActiveLearner {
        &self.learner
    }

    pub fn into_learner(self) -> ActiveLearner {
        self.learner
    }

    /// Read and execute commands until `quit` or end of input.
    ///
    /// Learner failures are reported and the session continues; only I/O errors on
    /// the session streams end it early.
    pub fn run(&mut self) -> Result<(), SessionError> {
        writeln!(
            self.output,
            "{} flights loaded. Type help for commands.",
            self.learner.store().len()
        )?;
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(message) => {
                    writeln!(self.output, "{message}")?;
                    continue;
                }
            };
            match self.execute(command) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(SessionError::Learner(err)) => {
                    warn!("{err}");
                    writeln!(self.output, "error: {err}")?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Labels => self.print_labels()?,
            Command::SetLabels(names) => {
                self.learner.set_labels(names);
                writeln!(self.output, "Labels replaced; all labeling work was reset.")?;
                self.print_labels()?;
            }
            Command::Start => self.start()?,
            Command::More => self.more()?,
            Command::Clusters => self.clusters()?,
            Command::Distribution => self.print_distribution()?,
            Command::Save(path) => {
                self.learner.save_labels(&path)?;
                writeln!(
                    self.output,
                    "Saved {} labels to {}",
                    self.learner.ledger().len(),
                    path.display()
                )?;
            }
            Command::Load(path) => {
                if self.learner.load_labels(&path) {
                    writeln!(
                        self.output,
                        "Loaded {} labels from {}",
                        self.learner.ledger().len(),
                        path.display()
                    )?;
                    self.print_labels()?;
                } else {
                    writeln!(self.output, "Could not load labels from {}", path.display())?;
                }
            }
            Command::Restart => {
                self.learner.restart();
                writeln!(self.output, "Session restarted.")?;
            }
            Command::Show(identifiers) => self.show(&identifiers)?,
            Command::Model(path) => {
                self.learner.export_model(&path)?;
                writeln!(self.output, "Saved model to {}", path.display())?;
            }
            Command::Help => writeln!(self.output, "{}", help_text())?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Label one representative flight per provisional class and start over from them.
    fn start(&mut self) -> Result<(), SessionError> {
        let centroids = self.learner.seed_centroids()?;
        let answers = self.prompt_labels(&centroids)?;
        let distinct: HashSet<usize> = answers.iter().map(|(_, label)| *label).collect();
        if distinct.len() < 2 {
            writeln!(
                self.output,
                "At least two different labels are needed to start; nothing was recorded."
            )?;
            return Ok(());
        }
        self.learner.restart();
        self.learner.label_flights(answers)?;
        info!(labeled = self.learner.ledger().len(), "Session started");
        self.print_distribution()
    }

    fn more(&mut self) -> Result<(), SessionError> {
        let batch = self.learner.select_batch()?;
        if batch.is_empty() {
            writeln!(self.output, "Every flight is labeled.")?;
            return Ok(());
        }
        let answers = self.prompt_labels(&batch)?;
        self.learner.label_flights(answers)?;
        self.print_distribution()
    }

    /// Most confident flights per label, followed by the human-labeled ones.
    fn clusters(&mut self) -> Result<(), SessionError> {
        let (test_ids, test_names) = self.learner.labeled_test_snapshot(true, true)?;
        let (train_ids, train_names) = self.learner.labeled_training_snapshot()?;
        let assigned: Vec<(&String, &String)> = test_ids
            .iter()
            .zip(&test_names)
            .chain(train_ids.iter().zip(&train_names))
            .collect();
        for name in self.learner.labels().names() {
            let members: Vec<&str> = assigned
                .iter()
                .filter(|(_, label)| *label == name)
                .map(|(identifier, _)| identifier.as_str())
                .collect();
            writeln!(self.output, "{name} ({})", members.len())?;
            for identifier in members.iter().take(CLUSTER_PREVIEW) {
                writeln!(self.output, "    {identifier}")?;
            }
        }
        if let Some(report) = self.learner.last_validation() {
            writeln!(
                self.output,
                "Validation accuracy {:.3}, macro F1 {:.3}",
                report.accuracy, report.macro_f1
            )?;
            write!(self.output, "{}", report.matrix.render())?;
        }
        Ok(())
    }

    /// Summarize each distinct flight; one unreadable file reports and shows nothing.
    fn show(&mut self, identifiers: &[String]) -> Result<(), SessionError> {
        match load_flight_tracks(identifiers) {
            Ok(tracks) => {
                for (path, track) in tracks {
                    if identifiers.len() > 1 {
                        write!(self.output, "{}: ", path.display())?;
                    }
                    writeln!(self.output, "{}", describe(&track.summary()))?;
                }
            }
            Err(err) => writeln!(self.output, "{err}")?,
        }
        Ok(())
    }

    fn print_labels(&mut self) -> Result<(), SessionError> {
        if self.learner.labels().is_empty() {
            writeln!(self.output, "-- None --")?;
        }
        for (index, name) in self.learner.labels().names().iter().enumerate() {
            writeln!(self.output, "  {index}: {name}")?;
        }
        Ok(())
    }

    fn print_distribution(&mut self) -> Result<(), SessionError> {
        let counts = self.learner.label_distribution()?;
        for (name, count) in self.learner.labels().names().iter().zip(counts) {
            writeln!(self.output, "{name} ({count})")?;
        }
        Ok(())
    }

    /// Ask for a label per flight; stops early at end of input.
    fn prompt_labels(&mut self, identifiers: &[String]) -> Result<Vec<(String, usize)>, SessionError> {
        self.print_labels()?;
        let mut answers = Vec::with_capacity(identifiers.len());
        for (position, identifier) in identifiers.iter().enumerate() {
            loop {
                write!(
                    self.output,
                    "[{}/{}] {identifier}: ",
                    position + 1,
                    identifiers.len()
                )?;
                self.output.flush()?;
                let Some(line) = self.read_line()? else {
                    return Ok(answers);
                };
                let answer = line.trim();
                if answer.is_empty() {
                    break;
                }
                if answer == "?" {
                    self.show(std::slice::from_ref(identifier))?;
                    continue;
                }
                match self.parse_label(answer) {
                    Some(label) => {
                        answers.push((identifier.clone(), label));
                        break;
                    }
                    None => writeln!(self.output, "Unknown label {answer:?}")?,
                }
            }
        }
        Ok(answers)
    }

    fn parse_label(&self, answer: &str) -> Option<usize> {
        let labels = self.learner.labels();
        if let Ok(index) = answer.parse::<usize>() {
            return (index < labels.len()).then_some(index);
        }
        labels.index_of(answer).or_else(|| {
            labels
                .names()
                .iter()
                .position(|name| name.eq_ignore_ascii_case(answer))
        })
    }

    fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

fn with_csv_extension(name: &str) -> PathBuf {
    if name.ends_with(".csv") {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{name}.csv"))
    }
}

fn describe(summary: &TrackSummary) -> String {
    let range = |value: Option<(f64, f64)>| match value {
        Some((low, high)) => format!("{low:.4} .. {high:.4}"),
        None => "n/a".to_string(),
    };
    format!(
        "{} points, AltGPS {}, Latitude {}, Longitude {}",
        summary.points,
        range(summary.altitude),
        range(summary.latitude),
        range(summary.longitude)
    )
}

fn help_text() -> String {
    [
        "Commands:",
        "  labels                 List label names and their indices.",
        "  set-labels a,b,c       Replace the label names (resets all labels).",
        "  start                  Label one representative flight per cluster.",
        "  more                   Label the next batch of selected flights.",
        "  clusters               Show the most confident flights per label.",
        "  dist                   Show label counts including predictions.",
        "  save <file>            Save labels as CSV (.csv is appended if missing).",
        "  load <file>            Load labels from CSV, replacing label names.",
        "  restart                Forget every label.",
        "  show <flight> ...      Summarize one or more flight files.",
        "  model <file>           Train and save the model as JSON.",
        "  quit                   Leave the session.",
        "",
        "When labeling, answer with an index or a name; ? shows the flight, empty skips.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::LearnerOptions;
    use crate::dataset::{FeatureRow, FeatureStore};
    use crate::labeling::LabelSet;
    use crate::ml::TrainOptions;
    use std::io::Cursor;

    fn learner() -> ActiveLearner {
        let rows = (0..12)
            .map(|idx| {
                let offset = if idx < 6 { 0.0 } else { 8.0 };
                FeatureRow {
                    identifier: format!("flight{idx:02}"),
                    features: vec![offset + idx as f64 * 0.1, offset],
                    label: Some(idx / 6),
                }
            })
            .collect();
        let store = FeatureStore::from_rows(vec!["a".into(), "b".into()], rows).unwrap();
        let options = LearnerOptions {
            batch_size: 4,
            classifier: TrainOptions {
                threads: 1,
                ..TrainOptions::default()
            },
            ..LearnerOptions::default()
        };
        ActiveLearner::new(LabelSet::new(["Pattern Work", "Cross-Country"]), store, options).unwrap()
    }

    fn run(script: &str) -> (ActiveLearner, String) {
        let mut output = Vec::new();
        let mut session = Session::new(learner(), Cursor::new(script.to_string()), &mut output);
        session.run().unwrap();
        let learner = session.into_learner();
        (learner, String::from_utf8(output).unwrap())
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("start"), Ok(Command::Start));
        assert_eq!(
            Command::parse("set-labels  a, b ,c"),
            Ok(Command::SetLabels(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(
            Command::parse("save run1"),
            Ok(Command::Save(PathBuf::from("run1.csv")))
        );
        assert_eq!(
            Command::parse("save run1.csv"),
            Ok(Command::Save(PathBuf::from("run1.csv")))
        );
        assert_eq!(
            Command::parse("show a.csv  b.csv"),
            Ok(Command::Show(vec!["a.csv".into(), "b.csv".into()]))
        );
        assert!(Command::parse("show").is_err());
        assert!(Command::parse("load").is_err());
        assert!(Command::parse("set-labels ,").is_err());
        assert!(Command::parse("fly").is_err());
    }

    #[test]
    fn start_then_more_labels_flights() {
        let (learner, output) = run("start\n0\nCross-Country\nmore\n0\n\n1\n1\nquit\n");
        assert_eq!(learner.ledger().len(), 5);
        assert!(output.contains("Pattern Work ("));
        assert!(output.contains("[1/4]"));
    }

    #[test]
    fn start_needs_two_distinct_labels() {
        let (learner, output) = run("start\n0\n0\n");
        assert!(learner.ledger().is_empty());
        assert!(output.contains("At least two different labels"));
    }

    #[test]
    fn unknown_answers_are_asked_again() {
        let (learner, output) = run("start\n7\nglider\n0\n1\n");
        assert!(output.contains("Unknown label \"7\""));
        assert!(output.contains("Unknown label \"glider\""));
        assert_eq!(learner.ledger().len(), 2);
    }

    #[test]
    fn learner_errors_do_not_end_the_session() {
        let (_, output) = run("more\nbogus\nlabels\n");
        assert!(output.contains("error: No labeled flights to train on"));
        assert!(output.contains("Unknown command \"bogus\""));
        assert!(output.contains("1: Cross-Country"));
    }

    #[test]
    fn save_restart_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels");
        let script = format!(
            "start\n0\n1\nsave {0}\nrestart\ndist\nload {0}.csv\nclusters\n",
            path.display()
        );
        let (learner, output) = run(&script);
        assert!(output.contains("Saved 2 labels"));
        assert!(output.contains("Session restarted."));
        assert!(output.contains("Loaded 2 labels"));
        assert_eq!(learner.ledger().len(), 2);
        assert!(output.contains("Pattern Work (6)"));
    }

    #[test]
    fn show_summarizes_each_distinct_flight() {
        let dir = tempfile::tempdir().unwrap();
        let body = "#airframe_info\n#units\nAltGPS,Roll,Pitch,HDG,Latitude,Longitude\n\
                    1000,0,0,90,40.0,-86.0\n1020,0,0,91,40.1,-86.1\n";
        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");
        std::fs::write(&first, body).unwrap();
        std::fs::write(&second, body).unwrap();

        let script = format!("show {0} {1} {0}\n", first.display(), second.display());
        let (_, output) = run(&script);
        assert_eq!(output.matches("2 points, AltGPS 1000.0000 .. 1020.0000").count(), 2);
        assert!(output.contains(&format!("{}: 2 points", first.display())));
        assert!(output.contains(&format!("{}: 2 points", second.display())));
    }

    #[test]
    fn show_reports_missing_flight_file() {
        let (_, output) = run("show /no/such/flight.csv\n");
        assert!(output.contains("Failed to read flight file"));
    }
}
