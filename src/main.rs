use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use gsvm::param::{self, Param};
use gsvm::run;
use log::{error, info, warn};
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn start_logger(param: &Param) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let logger = Logger::try_with_str(&param.general.log_level)?;
    if param.general.log_base.is_empty() {
        logger.start()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix),
            )
            .duplicate_to_stderr(Duplicate::All)
            .start()
    }
}

#[cfg(unix)]
fn watch_signals(running: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                for signal in signals.forever() {
                    if running.swap(false, Ordering::SeqCst) {
                        warn!("Signal {} received: stopping after the current turn", signal);
                    } else {
                        warn!("Signal {} received again: aborting", signal);
                        process::exit(130);
                    }
                }
            });
        }
        Err(e) => warn!("Could not register signal handlers: {}", e),
    }
}

#[cfg(not(unix))]
fn watch_signals(_running: Arc<AtomicBool>) {}

fn main() {
    let start = Instant::now();
    let param_file = env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::get(&param_file) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot load {}: {}", param_file, e);
            process::exit(1);
        }
    };

    let _logger = match start_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            process::exit(1);
        }
    };
    info!("Parameters loaded from {}", param_file);

    let running = Arc::new(AtomicBool::new(true));
    watch_signals(Arc::clone(&running));

    if let Err(e) = run(&param, running) {
        error!("{}", e);
        process::exit(1);
    }

    info!("All Done in {:.2?}", start.elapsed());
}
