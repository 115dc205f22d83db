use clap::Parser;

use digitizer::{AcquisitionMode, AcquisitionOptions, Channel, Device, sys::sim::SimulatedDigitizer};

/// Configure a simulated digitizer in basic mode to check that every step is accepted.
#[derive(Parser, Debug)]
#[command(name = "digitizer-probe")]
struct Args {
    /// Number of input channels on the simulated board
    #[arg(long, default_value_t = 4,
          value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=16))]
    inputs: usize,

    /// ADC resolution of the simulated board
    #[arg(long, default_value_t = 14, value_parser = clap::value_parser!(u32).range(1..=16))]
    bits: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sim = SimulatedDigitizer::new(args.inputs, args.bits);
    Device::with(sim, |device| {
        let info = device.channel_info();
        println!("{} inputs, {}-bit, {} samples per channel",
            info.input_channels, info.bits_per_sample, info.max_samples_per_channel);
        let enabled = 1 << info.input_channels.ilog2();
        let options = AcquisitionOptions {
            mode: AcquisitionMode::Basic,
            channels: Channel::ALL[..enabled].iter()
                .map(|&channel| (channel, Default::default()))
                .collect(),
            ..Default::default()
        };
        device.configure(options)?;
        println!("configured {} channels ({:?}): {:?}",
            device.channels().channel_count(), device.channels().channel_mask(), device.state());
        Ok(())
    })?;
    Ok(())
}
