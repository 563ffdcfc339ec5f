use crate::error::{GsvmError, Result};
use crate::hyperparams::{HyperParams, LabelResult, NO_HYPERPARAMS};
use crate::individual::{FeatureMask, Individual};
use crate::population::Population;
use crate::utils::fmt_float;
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const REPORT_TITLE: &str = "Genetic SVM Study Report";
pub const FORMAT_VERSION: u32 = 2;
/// Reports written before the version line existed
pub const LEGACY_VERSION: u32 = 1;

const FORMAT_KEY: &str = "format: ";
const PARAMETER_FILE_KEY: &str = "parameterFile: ";
const INDEX_FILE_KEY: &str = "indexFile: ";
const DATA_FILE_KEY: &str = "dataFile: ";
const FEATURE_FILE_KEY: &str = "featureFile: ";
const TURN_KEY: &str = "Turn: ";
const AVERAGE_KEY: &str = "Average F-Measure of turn: ";

/// Input files a study was run on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportHeader {
    pub parameter_file: Option<String>,
    pub index_file: Option<String>,
    pub data_file: Option<String>,
    pub feature_file: Option<String>,
}

impl ReportHeader {
    /// Header with every path made absolute when it exists
    pub fn new(parameters: &str, index: &str, matrix: &str, features: Option<&str>) -> ReportHeader {
        ReportHeader {
            parameter_file: Some(absolute_path(parameters)),
            index_file: Some(absolute_path(index)),
            data_file: Some(absolute_path(matrix)),
            feature_file: features.map(absolute_path),
        }
    }
}

fn absolute_path(path: &str) -> String {
    fs::canonicalize(path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_string())
}

/// Append-only report, flushed after every turn so that it can serve as a checkpoint
pub struct ReportWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl ReportWriter {
    pub fn create<P: AsRef<Path>>(path: P, header: &ReportHeader) -> Result<ReportWriter> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", REPORT_TITLE)?;
        writeln!(writer, "{}{}", FORMAT_KEY, FORMAT_VERSION)?;
        let entries = [
            (PARAMETER_FILE_KEY, &header.parameter_file),
            (INDEX_FILE_KEY, &header.index_file),
            (DATA_FILE_KEY, &header.data_file),
            (FEATURE_FILE_KEY, &header.feature_file),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                writeln!(writer, "{}{}", key, value)?;
            }
        }
        writer.flush()?;
        info!("Writing report to {}", path.display());
        Ok(ReportWriter {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the block of a ranked population and flushes it
    pub fn write_turn(&mut self, turn: usize, population: &Population) -> Result<()> {
        self.writer.write_all(format_turn(turn, population).as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// `<fit>\t<mask>\t<pct>%`, then one `\t[ Label = ... ]` line per label
pub fn format_individual(individual: &Individual) -> String {
    let mut line = format!(
        "{}\t{}\t{}%",
        fmt_float(individual.fit()),
        individual.mask,
        fmt_float(individual.selected_pct())
    );
    for result in individual.results.iter().flatten() {
        let params = match &result.params {
            Some(params) => params.to_flags(),
            None => NO_HYPERPARAMS.to_string(),
        };
        line.push_str(&format!(
            "\n\t[ Label = {} fMeasure = {} Precision = {} Recall = {} Parameters = {} ]",
            result.label,
            fmt_float(result.f_measure()),
            fmt_float(result.precision),
            fmt_float(result.recall),
            params
        ));
    }
    line
}

/// Turn block: only evaluated individuals are listed
pub fn format_turn(turn: usize, population: &Population) -> String {
    let mut block = format!("\n{}{}\n", TURN_KEY, turn);
    for individual in population.evaluated() {
        block.push_str(&format_individual(individual));
        block.push('\n');
    }
    block.push_str(&format!("{}{}\n", AVERAGE_KEY, fmt_float(population.average_fit())));
    block
}

/// One parsed turn block
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub turn: usize,
    /// Ranked as written, results attached
    pub individuals: Vec<Individual>,
    pub average: Option<f64>,
}

/// What a previous report offers to resume from
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub version: u32,
    pub header: ReportHeader,
    pub turns: usize,
    pub last: Option<TurnRecord>,
}

impl Checkpoint {
    /// Population of the last turn; `None` when it holds no individual
    pub fn population(&self) -> Option<Population> {
        match &self.last {
            Some(record) if !record.individuals.is_empty() => Some(Population::from(record.individuals.clone())),
            _ => None,
        }
    }

    /// First-ranked individual of the last turn
    pub fn best(&self) -> Option<&Individual> {
        self.last.as_ref().and_then(|record| record.individuals.first())
    }
}

pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let path = path.as_ref();
    info!("Loading checkpoint {}...", path.display());
    let text = fs::read_to_string(path).map_err(|e| GsvmError::input(path, e.to_string()))?;
    parse_report(&text, &path.display().to_string())
}

/// Parses a report. Lines outside the grammar are tolerated before the first turn only.
pub fn parse_report(text: &str, source: &str) -> Result<Checkpoint> {
    let error = |line: usize, message: String| GsvmError::Checkpoint {
        path: source.to_string(),
        line,
        message,
    };

    let mut checkpoint = Checkpoint {
        version: LEGACY_VERSION,
        header: ReportHeader::default(),
        turns: 0,
        last: None,
    };
    let mut current: Option<TurnRecord> = None;

    for (i, raw) in text.lines().enumerate() {
        let number = i + 1;
        let line = raw.trim_end_matches('\r');

        if line.trim().is_empty() || line == REPORT_TITLE {
            continue;
        }
        if let Some(value) = line.strip_prefix(FORMAT_KEY) {
            checkpoint.version = value
                .trim()
                .parse()
                .map_err(|_| error(number, format!("invalid format version '{}'", value)))?;
        } else if let Some(value) = line.strip_prefix(PARAMETER_FILE_KEY) {
            checkpoint.header.parameter_file = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(INDEX_FILE_KEY) {
            checkpoint.header.index_file = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(DATA_FILE_KEY) {
            checkpoint.header.data_file = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(FEATURE_FILE_KEY) {
            checkpoint.header.feature_file = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(TURN_KEY) {
            let turn = value
                .trim()
                .parse()
                .map_err(|_| error(number, format!("invalid turn number '{}'", value)))?;
            if let Some(record) = current.take() {
                checkpoint.last = Some(record);
            }
            checkpoint.turns += 1;
            current = Some(TurnRecord {
                turn,
                individuals: Vec::new(),
                average: None,
            });
        } else if let Some(value) = line.strip_prefix(AVERAGE_KEY) {
            match current.as_mut() {
                Some(record) => record.average = value.trim().parse().ok(),
                None => return Err(error(number, "average outside of a turn".to_string())),
            }
        } else if line.trim_start().starts_with('[') && current.is_some() {
            let individual = current
                .as_mut()
                .and_then(|record| record.individuals.last_mut())
                .ok_or_else(|| error(number, "label entry before any individual".to_string()))?;
            let result = parse_label_entry(line).map_err(|message| error(number, message))?;
            individual.results.get_or_insert_with(Vec::new).push(result);
        } else if let Some(record) = current.as_mut() {
            let individual = parse_individual(line).map_err(|message| error(number, message))?;
            record.individuals.push(individual);
        } else {
            debug!("{}:{}: ignoring '{}'", source, number, line);
        }
    }

    if let Some(record) = current {
        checkpoint.last = Some(record);
    }
    Ok(checkpoint)
}

fn parse_individual(line: &str) -> std::result::Result<Individual, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 3 {
        return Err(format!("unexpected line '{}'", line));
    }
    fields[0]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid fitness '{}'", fields[0]))?;
    let mask: FeatureMask = fields[1].parse().map_err(|e: GsvmError| e.to_string())?;

    // entries on the genome line itself are accepted as well
    let mut results = Vec::new();
    for entry in &fields[3..] {
        if entry.trim().is_empty() {
            continue;
        }
        results.push(parse_label_entry(entry)?);
    }

    let mut individual = Individual::new(mask);
    individual.results = Some(results);
    Ok(individual)
}

/// Text between `start` and the following `end` (or the end of `text` when `end` is empty)
fn between<'t>(text: &'t str, start: &str, end: &str) -> Option<&'t str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    if end.is_empty() {
        return Some(rest.trim());
    }
    rest.find(end).map(|to| rest[..to].trim())
}

fn parse_label_entry(entry: &str) -> std::result::Result<LabelResult, String> {
    let entry = entry.trim();
    let inner = entry
        .strip_prefix('[')
        .and_then(|e| e.strip_suffix(']'))
        .ok_or_else(|| format!("malformed label entry '{}'", entry))?;

    let field = |start: &str, end: &str| between(inner, start, end).ok_or_else(|| format!("missing '{}' in '{}'", start.trim(), entry));
    let number = |text: &str| text.parse::<f64>().map_err(|_| format!("invalid number '{}' in '{}'", text, entry));

    let label = field("Label = ", " fMeasure = ")?;
    let label: i32 = label
        .parse()
        .map_err(|_| format!("invalid label '{}' in '{}'", label, entry))?;
    let precision = number(field(" Precision = ", " Recall = ")?)?;
    let recall = number(field(" Recall = ", " Parameters = ")?)?;
    let params = HyperParams::from_report(field(" Parameters = ", "")?).map_err(|e| e.to_string())?;

    Ok(LabelResult::new(label, params, precision, recall))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::KernelKind;

    fn individual(mask: &str, results: Vec<LabelResult>) -> Individual {
        let mut individual = Individual::new(mask.parse().unwrap());
        individual.results = Some(results);
        individual
    }

    fn ranked() -> Population {
        Population::from(vec![
            individual(
                "1011",
                vec![
                    LabelResult::new(1, Some(HyperParams::linear(1.0)), 87.5, 70.0),
                    LabelResult::new(2, Some(HyperParams::new(KernelKind::Rbf, 100.0, 0, 0.0001)), 66.66666666666667, 100.0),
                ],
            ),
            individual(
                "0100",
                vec![
                    LabelResult::new(1, Some(HyperParams::new(KernelKind::Polynomial, 10.0, 3, 0.0)), 50.0, 50.0),
                    LabelResult::unmeasured(2),
                ],
            ),
            Individual::new("1111".parse().unwrap()),
        ])
        .sort()
    }

    #[test]
    fn test_format_individual() {
        let line = format_individual(&individual(
            "1010",
            vec![LabelResult::new(3, Some(HyperParams::linear(1.0)), 50.0, 50.0), LabelResult::unmeasured(4)],
        ));
        assert_eq!(
            line,
            "25.0\t1010\t50.0%\n\
             \t[ Label = 3 fMeasure = 50.0 Precision = 50.0 Recall = 50.0 Parameters = -t 0 -c 1.0 ]\n\
             \t[ Label = 4 fMeasure = 0.0 Precision = -1.0 Recall = -1.0 Parameters = null ]"
        );
    }

    #[test]
    fn test_format_turn_skips_unevaluated_and_averages() {
        let block = format_turn(2, &ranked());
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "Turn: 2");
        assert_eq!(lines.len(), 9);
        assert!(lines[2].contains("\t1011\t"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("\t[ Label = ")).count(), 4);
        assert!(lines[3].starts_with("\t[ Label = 1 "));
        assert!(lines[4].starts_with("\t[ Label = 2 "));
        assert!(lines[8].starts_with("Average F-Measure of turn: "));

        let empty = format_turn(1, &Population::from(vec![Individual::new("11".parse().unwrap())]));
        assert_eq!(empty, "\nTurn: 1\nAverage F-Measure of turn: 0.0\n");
    }

    #[test]
    fn test_round_trip_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.txt");
        let header = ReportHeader {
            parameter_file: Some("/data/params".to_string()),
            index_file: Some("/data/index".to_string()),
            data_file: Some("/data/matrix".to_string()),
            feature_file: None,
        };
        let pop = ranked();
        let mut writer = ReportWriter::create(&path, &header).unwrap();
        writer.write_turn(1, &Population::from(vec![pop.individuals[1].clone()])).unwrap();
        writer.write_turn(2, &pop).unwrap();

        let checkpoint = load_checkpoint(&path).unwrap();
        assert_eq!(checkpoint.version, FORMAT_VERSION);
        assert_eq!(checkpoint.header, header);
        assert_eq!(checkpoint.turns, 2);
        let last = checkpoint.last.as_ref().unwrap();
        assert_eq!(last.turn, 2);
        assert_eq!(last.individuals.len(), 2);
        for (parsed, original) in last.individuals.iter().zip(pop.evaluated()) {
            assert_eq!(parsed.mask, original.mask);
            assert_eq!(parsed.results, original.results);
            assert_eq!(parsed.fit(), original.fit());
        }
        assert_eq!(last.average, Some(pop.average_fit()));
        assert_eq!(checkpoint.best().unwrap().mask.to_string(), "1011");
        assert_eq!(checkpoint.population().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_legacy_report() {
        let text = "Genetic SVM Study Report\n\
                    parameterFile: /old/params\n\
                    indexFile: /old/index\n\
                    dataFile: /old/matrix\n\
                    featureFile: /old/features\n\
                    \n\
                    Turn: 1\n\
                    20.0\t1111\t100.0%\n\
                    \t[ Label = 1 fMeasure = 20.0 Precision = 20.0 Recall = 20.0 Parameters = -t 0 -c 1.0 ]\n\
                    Average F-Measure of turn: 20.0\n\
                    \n\
                    Turn: 2\n\
                    50.0\t0110\t50.0%\n\
                    \t[ Label = 1 fMeasure = 50.0 Precision = 50.0 Recall = 50.0 Parameters = -t 2 -c 1000.0 -g 1.0E-4 ]\n\
                    \t[ Label = 2 fMeasure = 50.0 Precision = 50.0 Recall = 50.0 Parameters = null ]\n\
                    20.0\t1111\t100.0%\n\
                    \t[ Label = 1 fMeasure = 20.0 Precision = 20.0 Recall = 20.0 Parameters = -t 0 -c 1.0 ]\n\
                    \t[ Label = 2 fMeasure = 20.0 Precision = 20.0 Recall = 20.0 Parameters = -t 0 -c 1.0 ]\n\
                    Average F-Measure of turn: 35.0\n";
        let checkpoint = parse_report(text, "legacy").unwrap();
        assert_eq!(checkpoint.version, LEGACY_VERSION);
        assert_eq!(checkpoint.header.feature_file.as_deref(), Some("/old/features"));
        let best = checkpoint.best().unwrap();
        let results = best.results.as_ref().unwrap();
        assert_eq!(checkpoint.turns, 2);
        assert_eq!(checkpoint.population().unwrap().len(), 2);
        assert_eq!(best.mask.to_string(), "0110");
        assert_eq!(results.iter().map(|r| r.label).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(results[0].params, Some(HyperParams::new(KernelKind::Rbf, 1000.0, 0, 0.0001)));
        assert_eq!(results[1].params, None);
        assert_eq!(best.fit(), 50.0);
    }

    #[test]
    fn test_parse_label_entries_on_the_genome_line() {
        let text = "\nTurn: 1\n50.0\t01\t50.0%\t[ Label = 1 fMeasure = 50.0 Precision = 50.0 Recall = 50.0 Parameters = -t 0 -c 1.0 ]\n";
        let checkpoint = parse_report(text, "single-line").unwrap();
        assert_eq!(checkpoint.best().unwrap().results.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_label_line_before_any_individual_is_an_error() {
        let text = "\nTurn: 1\n\t[ Label = 1 fMeasure = 50.0 Precision = 50.0 Recall = 50.0 Parameters = null ]\n";
        match parse_report(text, "orphan").unwrap_err() {
            GsvmError::Checkpoint { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_report_without_individuals_is_no_checkpoint() {
        let text = "Genetic SVM Study Report\nformat: 2\n\nTurn: 1\nAverage F-Measure of turn: 0.0\n";
        let checkpoint = parse_report(text, "empty").unwrap();
        assert_eq!(checkpoint.turns, 1);
        assert!(checkpoint.population().is_none());
        assert!(checkpoint.best().is_none());

        let checkpoint = parse_report("Genetic SVM Study Report\n", "title-only").unwrap();
        assert!(checkpoint.population().is_none());
    }

    #[test]
    fn test_garbage_inside_a_turn_is_an_error() {
        let text = "Genetic SVM Study Report\nsome preamble\n\nTurn: 1\nnot an individual\n";
        let err = parse_report(text, "broken").unwrap_err();
        match err {
            GsvmError::Checkpoint { line, .. } => assert_eq!(line, 5),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_label_entry_is_an_error() {
        let text = "\nTurn: 1\n50.0\t01\t50.0%\n\t[ Label = x fMeasure = 1 Precision = 1 Recall = 1 Parameters = null ]\n";
        assert!(parse_report(text, "broken").is_err());
    }
}
