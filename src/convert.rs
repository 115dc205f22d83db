//! Conversion of raw ADC codes to voltages.
//!
//! The hardware delivers every sample as a 16-bit word with the `N`-bit code left-justified.
//! Code `2^(N-1)` is zero volts; the full code range spans the channel's input range.

use wide::f64x4;

use crate::{Error, Result};

fn check_bits(bits_per_sample: u32) -> Result<()> {
    if !(9..=16).contains(&bits_per_sample) {
        return Err(Error::unsupported(format!("cannot convert {}-bit samples", bits_per_sample)))
    }
    Ok(())
}

/// Convert `raw` words into `volts`, which must be at least as long.
pub fn convert_into(raw: &[u16], range_volts: f64, bits_per_sample: u32, volts: &mut [f64])
        -> Result<()> {
    check_bits(bits_per_sample)?;
    if volts.len() < raw.len() {
        return Err(Error::invalid(format!("{} samples do not fit into {} outputs",
            raw.len(), volts.len())))
    }
    let shift = 16 - bits_per_sample;
    let midpoint = (1u32 << (bits_per_sample - 1)) as f64;
    let scale = range_volts / midpoint;

    let mut raw_chunks = raw.chunks_exact(4);
    let mut volts_chunks = volts[..raw.len()].chunks_exact_mut(4);
    let midpoint_x4 = f64x4::splat(midpoint);
    let scale_x4 = f64x4::splat(scale);
    for (input, output) in (&mut raw_chunks).zip(&mut volts_chunks) {
        let codes = f64x4::new([
            (input[0] >> shift) as f64,
            (input[1] >> shift) as f64,
            (input[2] >> shift) as f64,
            (input[3] >> shift) as f64,
        ]);
        output.copy_from_slice(&((codes - midpoint_x4) * scale_x4).to_array());
    }
    for (&word, voltage) in raw_chunks.remainder().iter().zip(volts_chunks.into_remainder()) {
        *voltage = ((word >> shift) as f64 - midpoint) * scale;
    }
    Ok(())
}

pub fn convert(raw: &[u16], range_volts: f64, bits_per_sample: u32) -> Result<Vec<f64>> {
    let mut volts = vec![0.0; raw.len()];
    convert_into(raw, range_volts, bits_per_sample, &mut volts)?;
    Ok(volts)
}

/// Word the hardware would deliver for `voltage`, clamped to the code range.
pub fn encode(voltage: f64, range_volts: f64, bits_per_sample: u32) -> Result<u16> {
    check_bits(bits_per_sample)?;
    let midpoint = (1u32 << (bits_per_sample - 1)) as f64;
    let max_code = ((1u32 << bits_per_sample) - 1) as f64;
    let code = (voltage / range_volts * midpoint + midpoint).round().clamp(0.0, max_code);
    Ok((code as u16) << (16 - bits_per_sample))
}
