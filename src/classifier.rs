use crate::error::{GsvmError, Result};
use crate::hyperparams::HyperParams;
use crate::param::Param;
use crate::pool::CancelToken;
use crate::string_vec;
use log::{debug, error};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

pub const RECALL_PREFIX: &str = "Leave-one-out estimate of the recall";
pub const PRECISION_PREFIX: &str = "Leave-one-out estimate of the precision";

/// Delay between two exit checks of a process whose output is already closed
const EXIT_POLL: Duration = Duration::from_millis(5);

/// Result of one leave-one-out training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trial {
    /// The process ran to its end; metrics are -1 when they could not be read
    Completed {
        precision: f64,
        recall: f64,
        success: bool,
    },
    /// The token fired before the process ended
    Cancelled,
}

/// Command lines of the external SVM learner and classifier.
/// Each command is split on whitespace, so it may carry leading arguments (`sh learn.sh`).
#[derive(Debug, Clone)]
pub struct Classifier {
    learn: Vec<String>,
    classify: Vec<String>,
    poll_interval: Duration,
}

impl Classifier {
    pub fn new(learn: &str, classify: &str, poll_interval: Duration) -> Result<Classifier> {
        let split = |command: &str, what: &str| -> Result<Vec<String>> {
            let parts: Vec<String> = command.split_whitespace().map(String::from).collect();
            if parts.is_empty() {
                Err(GsvmError::Configuration(format!("empty {} command", what)))
            } else {
                Ok(parts)
            }
        };
        Ok(Classifier {
            learn: split(learn, "learn")?,
            classify: split(classify, "classify")?,
            poll_interval,
        })
    }

    pub fn from_param(param: &Param) -> Result<Classifier> {
        Classifier::new(
            &param.classifier.learn,
            &param.classifier.classify,
            Duration::from_millis(param.ga.poll_interval_ms),
        )
    }

    fn command(parts: &[String]) -> Command {
        let mut command = Command::new(&parts[0]);
        command.args(&parts[1..]);
        command
    }

    /// Trains with leave-one-out estimation and reads precision and recall from stdout.
    /// The token is checked while waiting for every line and for the exit; once it fires,
    /// the process is killed and `Trial::Cancelled` is returned.
    pub fn leave_one_out(&self, params: &HyperParams, train: &Path, model: &Path, token: &CancelToken) -> io::Result<Trial> {
        let mut command = Classifier::command(&self.learn);
        command.args(params.args()).args(loo_flags(true)).arg(train).arg(model);
        debug!("Running {:?}", command);

        let mut process = RunningProcess::spawn(command)?;
        let mut precision = -1.0;
        let mut recall = -1.0;

        loop {
            if token.is_cancelled() {
                return Ok(Trial::Cancelled);
            }
            match process.lines.recv_timeout(self.poll_interval) {
                Ok(Ok(line)) => {
                    if line.starts_with(RECALL_PREFIX) {
                        recall = parse_percentage(&line);
                    } else if line.starts_with(PRECISION_PREFIX) {
                        precision = parse_percentage(&line);
                    }
                }
                Ok(Err(e)) => {
                    if !is_benign(&e) {
                        error!("Reading classifier output failed: {}", e);
                    }
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        match process.wait(token)? {
            Some(status) => Ok(Trial::Completed {
                precision,
                recall,
                success: status.success(),
            }),
            None => Ok(Trial::Cancelled),
        }
    }

    /// Plain training (no leave-one-out) of `model` from `train`
    pub fn train(&self, params: &HyperParams, train: &Path, model: &Path) -> io::Result<ExitStatus> {
        let mut command = Classifier::command(&self.learn);
        command.args(params.args()).args(loo_flags(false)).arg(train).arg(model);
        run_to_end(command)
    }

    /// Classifies the examples of `input` with `model`, decision values going to `output`
    pub fn classify(&self, input: &Path, model: &Path, output: &Path) -> io::Result<ExitStatus> {
        let mut command = Classifier::command(&self.classify);
        command.arg(input).arg(model).arg(output);
        run_to_end(command)
    }
}

fn loo_flags(enabled: bool) -> Vec<String> {
    if enabled {
        string_vec!["-x", "1"]
    } else {
        string_vec!["-x", "0"]
    }
}

fn run_to_end(mut command: Command) -> io::Result<ExitStatus> {
    debug!("Running {:?}", command);
    let Output { status, stderr, .. } = command.stdin(Stdio::null()).output()?;
    for line in String::from_utf8_lossy(&stderr).lines() {
        debug!("classifier: {}", line);
    }
    Ok(status)
}

/// Number between the first `=` and the first `%` of a line, -1 when it cannot be read
pub fn parse_percentage(line: &str) -> f64 {
    let start = line.find('=').map(|i| i + 1).unwrap_or(0);
    match line.find('%') {
        Some(end) if end >= start => match line[start..end].trim().parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => -1.0,
        },
        _ => -1.0,
    }
}

/// Errors a killed process leaves on its streams
pub fn is_benign(e: &io::Error) -> bool {
    if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof) {
        return true;
    }
    // EBADF
    if e.raw_os_error() == Some(9) {
        return true;
    }
    let message = e.to_string();
    message.contains("Stream closed") || message.contains("Bad file descriptor")
}

/// A spawned classifier whose stdout lines arrive on `lines`.
/// Dropping it before the process has been reaped kills and reaps the process.
struct RunningProcess {
    child: Child,
    lines: Receiver<io::Result<String>>,
    reaped: bool,
}

impl RunningProcess {
    fn spawn(mut command: Command) -> io::Result<RunningProcess> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;

        let (tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => debug!("classifier: {}", line),
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(RunningProcess {
            child,
            lines,
            reaped: false,
        })
    }

    /// Waits for the exit status; `None` if the token fired first
    fn wait(&mut self, token: &CancelToken) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            if token.is_cancelled() {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage("Leave-one-out estimate of the recall: recall=87.50%"), 87.5);
        assert_eq!(parse_percentage("Leave-one-out estimate of the precision: precision= 100.00%"), 100.0);
        assert_eq!(parse_percentage("Leave-one-out estimate of the precision: precision=-nan%"), -1.0);
        assert_eq!(parse_percentage("Leave-one-out estimate of the recall: recall=12.5"), -1.0);
        assert_eq!(parse_percentage("Leave-one-out estimate of the recall: recall=NaN%"), -1.0);
        assert_eq!(parse_percentage("%=3"), -1.0);
    }

    #[test]
    fn test_is_benign() {
        assert!(is_benign(&io::Error::new(io::ErrorKind::BrokenPipe, "pipe")));
        assert!(is_benign(&io::Error::from_raw_os_error(9)));
        assert!(is_benign(&io::Error::new(io::ErrorKind::Other, "Stream closed")));
        assert!(!is_benign(&io::Error::new(io::ErrorKind::PermissionDenied, "denied")));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(Classifier::new("  ", "svm_classify", Duration::from_millis(10)).is_err());
        assert!(Classifier::new("svm_learn", "", Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_missing_binary_is_an_io_error() {
        let classifier = Classifier::new("/nonexistent/svm_learn", "/nonexistent/svm_classify", Duration::from_millis(10)).unwrap();
        let token = CancelToken::new();
        let result = classifier.leave_one_out(&HyperParams::linear(1.0), Path::new("a"), Path::new("b"), &token);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::fs;

        fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            format!("sh {}", path.display())
        }

        #[test]
        fn test_leave_one_out_reads_metrics_and_passes_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let args_file = dir.path().join("args");
            let learn = script(
                &dir,
                "learn.sh",
                &format!(
                    "echo \"$@\" > {}\n\
                     echo 'Leave-one-out estimate of the error: error=10.00%'\n\
                     echo 'Leave-one-out estimate of the recall: recall=80.00%'\n\
                     echo 'Leave-one-out estimate of the precision: precision=60.00%'\n",
                    args_file.display()
                ),
            );
            let classifier = Classifier::new(&learn, "true", Duration::from_millis(10)).unwrap();
            let trial = classifier
                .leave_one_out(&HyperParams::linear(2.0), Path::new("in.svm"), Path::new("out.model"), &CancelToken::new())
                .unwrap();
            assert_eq!(
                trial,
                Trial::Completed {
                    precision: 60.0,
                    recall: 80.0,
                    success: true
                }
            );
            let args = fs::read_to_string(&args_file).unwrap();
            assert_eq!(args.trim(), "-t 0 -c 2.0 -x 1 in.svm out.model");
        }

        #[test]
        fn test_failed_exit_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let learn = script(&dir, "learn.sh", "echo 'Leave-one-out estimate of the recall: recall=80.00%'\nexit 3\n");
            let classifier = Classifier::new(&learn, "true", Duration::from_millis(10)).unwrap();
            let trial = classifier
                .leave_one_out(&HyperParams::linear(1.0), Path::new("a"), Path::new("b"), &CancelToken::new())
                .unwrap();
            assert_eq!(
                trial,
                Trial::Completed {
                    precision: -1.0,
                    recall: 80.0,
                    success: false
                }
            );
        }

        #[test]
        fn test_cancellation_kills_the_process() {
            let dir = tempfile::tempdir().unwrap();
            let learn = script(&dir, "learn.sh", "exec sleep 30\n");
            let classifier = Classifier::new(&learn, "true", Duration::from_millis(10)).unwrap();
            let token = CancelToken::new();
            let canceller = token.clone();
            let start = Instant::now();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                canceller.cancel();
            });
            let trial = classifier
                .leave_one_out(&HyperParams::linear(1.0), Path::new("a"), Path::new("b"), &token)
                .unwrap();
            handle.join().unwrap();
            assert_eq!(trial, Trial::Cancelled);
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_train_and_classify_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let args_file = dir.path().join("args");
            let record = script(&dir, "record.sh", &format!("echo \"$@\" >> {}\n", args_file.display()));
            let classifier = Classifier::new(&record, &record, Duration::from_millis(10)).unwrap();
            let status = classifier
                .train(&HyperParams::linear(1.0), Path::new("t.svm"), Path::new("m.model"))
                .unwrap();
            assert!(status.success());
            let status = classifier
                .classify(Path::new("p.svm"), Path::new("m.model"), Path::new("r.out"))
                .unwrap();
            assert!(status.success());
            let args = fs::read_to_string(&args_file).unwrap();
            let lines: Vec<&str> = args.lines().collect();
            assert_eq!(lines, vec!["-t 0 -c 1.0 -x 0 t.svm m.model", "p.svm m.model r.out"]);
        }
    }
}
