//! Multi-sink structured logging, one instance per subsystem process (HAL or
//! State Machine), mirroring the original `FridgeLogger`: a stderr sink and
//! up to three rotating file sinks (info, debug, errors) gated by a debug
//! flag. Built on the `log` facade (as the teacher does) with `flexi_logger`
//! supplying the rotating file writers.

use std::path::Path;

use flexi_logger::{Cleanup, Criterion, DeferredNow, FileSpec, Naming};
use flexi_logger::writers::{FileLogWriter, LogWriter};
use log::{Level, LevelFilter, Log, Metadata, Record};

const ROTATE_MAX_BYTES: u64 = 10 * 1024 * 1024;
const ROTATE_BACKUP_COUNT: usize = 5;

fn log_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    write!(
        w,
        "{},\t{},\t{}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.args()
    )
}

fn file_writer(log_path: &Path, logger_name: &str, suffix: &str) -> anyhow::Result<FileLogWriter> {
    let spec = FileSpec::default()
        .directory(log_path)
        .basename(format!("{}-{}", logger_name.to_lowercase(), suffix))
        .suffix("log");

    let writer = FileLogWriter::builder(spec)
        .format(log_format)
        .append()
        .rotate(
            Criterion::Size(ROTATE_MAX_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(ROTATE_BACKUP_COUNT),
        )
        .try_build()?;

    Ok(writer)
}

/// Installs itself as the process-wide `log` logger. Only one `FridgeLogger`
/// may be installed per process, which matches how the original spawns one
/// process per subsystem (HAL server, SM server).
struct FanOutLogger {
    info_file: FileLogWriter,
    debug_file: Option<FileLogWriter>,
    error_file: FileLogWriter,
}

impl Log for FanOutLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut now = DeferredNow::new();

        if record.level() <= Level::Info {
            eprintln!(
                "{},\t{},\t{}",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            );
            let _ = self.info_file.write(&mut now, record);
        }

        if record.level() <= Level::Error {
            let _ = self.error_file.write(&mut now, record);
        }

        if let Some(debug_file) = &self.debug_file {
            let _ = debug_file.write(&mut now, record);
        }
    }

    fn flush(&self) {
        let _ = self.info_file.flush();
        let _ = self.error_file.flush();
        if let Some(debug_file) = &self.debug_file {
            let _ = debug_file.flush();
        }
    }
}

/// Handle returned after installing the fan-out logger. Dropping it has no
/// effect on the installed `log` backend (it cannot be uninstalled); it
/// exists so callers have something to hold for the process lifetime.
pub struct FridgeLogger {
    name: String,
}

impl FridgeLogger {
    /// Sets up logging for `logger_name` (conventionally "HAL" or
    /// "StateMachine"), writing rotating files under `log_path` and echoing
    /// INFO-and-above to stderr. When `debug` is true, a third file captures
    /// every record including DEBUG and TRACE.
    pub fn init(log_path: &Path, logger_name: &str, debug: bool) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_path)?;

        let info_file = file_writer(log_path, logger_name, "info")?;
        let error_file = file_writer(log_path, logger_name, "errors")?;
        let debug_file = if debug {
            Some(file_writer(log_path, logger_name, "debug")?)
        } else {
            None
        };

        let logger = FanOutLogger {
            info_file,
            debug_file,
            error_file,
        };

        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| anyhow::anyhow!("logger already installed: {e}"))?;
        log::set_max_level(LevelFilter::Trace);

        log::debug!("Starting up server");

        Ok(FridgeLogger {
            name: logger_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
