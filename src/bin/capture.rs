use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use digitizer::{Device, DrainOutcome, sys::sim::SimulatedDigitizer, settings::CaptureSettings};

/// Run one capture on a simulated digitizer and summarize each channel.
#[derive(Parser, Debug)]
#[command(name = "digitizer-capture")]
struct Args {
    /// Acquisition settings file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-buffer timeout in milliseconds; waits indefinitely if omitted
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Number of input channels on the simulated board
    #[arg(long, default_value_t = 4,
          value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=16))]
    inputs: usize,

    /// ADC resolution of the simulated board
    #[arg(long, default_value_t = 14, value_parser = clap::value_parser!(u32).range(1..=16))]
    bits: u32,

    /// Time between simulated trigger events in microseconds
    #[arg(long, default_value_t = 100)]
    trigger_period_us: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => CaptureSettings::load(path)
            .with_context(|| format!("cannot load settings from {}", path.display()))?,
        None => CaptureSettings::from_env()?,
    };
    let options = settings.to_options()?;
    let timeout = args.timeout_ms.map(Duration::from_millis);

    let sim = SimulatedDigitizer::new(args.inputs, args.bits)
        .with_trigger_period(Duration::from_micros(args.trigger_period_us));
    let summary = Device::with(sim, |device| {
        device.configure(options)?;
        if let Some(geometry) = device.geometry() {
            println!("{} records of {} samples, {} buffers of {} bytes",
                geometry.records_per_capture, geometry.samples_per_record,
                geometry.buffers_per_capture, geometry.bytes_per_buffer);
        }
        device.start_capture()?;
        let outcome = device.read_data(timeout)?;
        let mut summary = Vec::new();
        for (channel, config) in device.channels().iter() {
            let volts = device.get_data_as_single_sequence(channel)?;
            summary.push((channel, config.range, volts));
        }
        Ok((outcome, summary))
    })?;

    let (outcome, channels) = summary;
    match outcome {
        DrainOutcome::Complete { buffers } => println!("capture complete, {} buffers", buffers),
        DrainOutcome::Aborted { buffers } => println!("capture aborted after {} buffers", buffers),
    }
    for (channel, range, volts) in channels {
        if volts.is_empty() {
            println!("channel {}: no samples", channel);
            continue
        }
        let min = volts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = volts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = volts.iter().sum::<f64>() / volts.len() as f64;
        println!("channel {} (±{} V): {} samples, min {:+.4} V, max {:+.4} V, mean {:+.4} V",
            channel, range.volts(), volts.len(), min, max, mean);
    }
    Ok(())
}
