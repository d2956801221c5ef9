use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const LOG_FILE_PREFIX: &str = "nagger-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 30;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn retention_window(retention_days: i64) -> Result<TimeDelta> {
    if retention_days <= 0 {
        return Err(anyhow!("log retention must be positive, got {retention_days} days"));
    }
    TimeDelta::try_days(retention_days)
        .ok_or_else(|| anyhow!("log retention of {retention_days} days is out of range"))
}

/// Log to `<data_dir>/logs/nagger-YYYY-MM-DD.log`, rolling over at UTC midnight.
pub fn init_logging(data_dir: &str, retention_days: i64) -> Result<()> {
    let retention = retention_window(retention_days)?;
    let log_dir = PathBuf::from(data_dir).join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    prune_logs(&log_dir, Utc::now(), retention)?;

    let writer = DailyLogWriter::open(log_dir, retention, Utc::now().date_naive())?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// The file for one UTC day, plus what is needed to open the next one.
#[derive(Debug)]
struct DailyLogFile {
    log_dir: PathBuf,
    retention: TimeDelta,
    day: NaiveDate,
    file: File,
}

impl DailyLogFile {
    fn roll_if_needed(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        let today = now.date_naive();
        if today == self.day {
            return Ok(());
        }
        self.file.flush()?;
        self.file = open_log_file(&self.log_dir, today)?;
        self.day = today;
        let _ = prune_logs(&self.log_dir, now, self.retention);
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct DailyLogWriter {
    current: Arc<Mutex<DailyLogFile>>,
}

impl DailyLogWriter {
    fn open(log_dir: PathBuf, retention: TimeDelta, day: NaiveDate) -> Result<Self> {
        let file = open_log_file(&log_dir, day)
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
        Ok(Self {
            current: Arc::new(Mutex::new(DailyLogFile {
                log_dir,
                retention,
                day,
                file,
            })),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, DailyLogFile>> {
        self.current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.lock()?;
        current.roll_if_needed(Utc::now())?;
        current.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

fn log_file_path(log_dir: &Path, day: NaiveDate) -> PathBuf {
    log_dir.join(format!(
        "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
        day.format("%Y-%m-%d")
    ))
}

fn open_log_file(log_dir: &Path, day: NaiveDate) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(log_dir, day))
}

/// Remove `nagger-*.log` files whose day is older than `retention_days`.
/// Files that don't follow the naming scheme are left alone.
pub fn cleanup_old_logs(log_dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<()> {
    prune_logs(log_dir, now, retention_window(retention_days)?)
}

fn prune_logs(log_dir: &Path, now: DateTime<Utc>, retention: TimeDelta) -> Result<()> {
    let Some(cutoff) = now.checked_sub_signed(retention).map(|t| t.date_naive()) else {
        return Ok(());
    };
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };

    for entry in entries {
        let path = entry?.path();
        let stale = path.is_file()
            && path
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(parse_log_filename_day)
                .is_some_and(|day| day < cutoff);
        if stale {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

fn parse_log_filename_day(file_name: &str) -> Option<NaiveDate> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}
