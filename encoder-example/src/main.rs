use std::thread;

use anyhow::Context;
use log::*;

use encoder::Encoder;
use gpio_line::CdevGpio;

use crate::config::Config;
use crate::logger::Logger;

mod config;
mod logger;

const DEFAULT_CONFIG: &str = "encoder.json";

fn main() -> anyhow::Result<()> {
    let file_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::new(&file_name).with_context(|| format!("load {file_name}"))?;
    Logger::initialize(config.log_level)?;
    info!("config: {:?}", config);

    let gpio = CdevGpio::open(&config.chip, "encoder")
        .with_context(|| format!("open {}", config.chip))?;
    let encoder = Encoder::start_with_config(&gpio, config.encoder())
        .with_context(|| format!("start encoder on {}/{}", config.line_a, config.line_b))?;

    let sampler = encoder.sampler();
    let mut last = 0i64;
    loop {
        match sampler.sample() {
            Ok(position) if position != last => {
                println!("position={position} latency={:?}", sampler.latency());
                last = position;
            }
            Ok(_) => {}
            Err(e) => warn!("{e}"),
        }
        thread::sleep(config.interval());
    }
}
