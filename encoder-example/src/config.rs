use std::fs::File;
use std::time::Duration;

use log::*;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub line_a: u32,
    pub line_b: u32,
    /// GPIO character device holding both lines
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: LevelFilter,
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_interval_ms() -> u64 {
    10
}

fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

impl Config {
    pub fn new(file_name: &str) -> anyhow::Result<Self> {
        let file = File::open(file_name)?;
        let config: Config = serde_json::from_reader(file)?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn encoder(&self) -> encoder::Config {
        encoder::Config {
            invert: self.invert,
            ..encoder::Config::new(self.line_a, self.line_b)
        }
    }
}
