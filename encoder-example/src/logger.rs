use std::io::stdout;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::set_logger;
use log::set_max_level;
use log::Level;
use log::LevelFilter;
use log::Log;
use log::Record;

static LOGGER: Logger = Logger {
    started: OnceLock::new(),
};

pub struct Logger {
    started: OnceLock<Instant>,
}

impl Logger {
    pub fn initialize(level: LevelFilter) -> anyhow::Result<()> {
        LOGGER.started.get_or_init(Instant::now);
        set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("{e}"))?;
        set_max_level(level);
        Ok(())
    }

    fn get_color(level: Level) -> Option<u8> {
        match level {
            Level::Error => Some(31), // red
            Level::Warn => Some(33),  // brown
            Level::Info => Some(32),  // green
            _ => None,
        }
    }

    fn add_color_for_level(s: &str, level: Level) -> String {
        if let Some(color) = Self::get_color(level) {
            format!("\x1b[0;{color}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn millis(&self) -> u128 {
        self.started
            .get()
            .map_or(0, |started| started.elapsed().as_millis())
    }

    fn fmt_record(&self, record: &Record) -> String {
        format!(
            "{} ({}) {} {}",
            record.level(),
            self.millis(),
            record.metadata().target(),
            record.args()
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let msg = self.fmt_record(record);
            let msg_color = Self::add_color_for_level(&msg, record.level());
            let mut stdout = stdout().lock();
            // nowhere left to report a failed write to stdout
            let _ = writeln!(stdout, "{msg_color}");
            let _ = stdout.flush();
        }
    }

    fn flush(&self) {
        let _ = stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_only_the_loud_levels() {
        assert_eq!(
            Logger::add_color_for_level("boom", Level::Error),
            "\x1b[0;31mboom\x1b[0m"
        );
        assert_eq!(Logger::add_color_for_level("x", Level::Debug), "x");
    }

    #[test]
    fn record_format() {
        let logger = Logger {
            started: OnceLock::new(),
        };
        let record = Record::builder()
            .level(Level::Warn)
            .target("encoder")
            .args(format_args!("2 cycles lost"))
            .build();
        assert_eq!(logger.fmt_record(&record), "WARN (0) encoder 2 cycles lost");
    }
}
