use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use digitizer::{
    AcquisitionMode, AcquisitionOptions, Channel, ChannelConfiguration, ConfigStep, Device,
    DrainOutcome, Error, RecordLength, State, settings::CaptureSettings,
    sys::sim::SimulatedDigitizer,
};

fn device(sim: SimulatedDigitizer) -> Device<SimulatedDigitizer> {
    let mut device = Device::new(sim).unwrap();
    device.driver_mut().clear_calls();
    device
}

fn channels(channels: &[Channel]) -> std::collections::BTreeMap<Channel, ChannelConfiguration> {
    channels.iter().map(|&channel| (channel, ChannelConfiguration::default())).collect()
}

#[test]
fn pre_trigger_rejected_before_hardware_access() {
    let mut device = device(SimulatedDigitizer::new(4, 14));
    let result = device.configure(AcquisitionOptions {
        mode: AcquisitionMode::TriggeredContinuous,
        pre_trigger_samples: 1,
        ..Default::default()
    });
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    assert!(device.driver().calls().is_empty());
    assert_eq!(device.state(), State::Unconfigured);
}

#[test]
fn channel_counts() {
    let mut device = device(SimulatedDigitizer::new(4, 14));
    let result = device.configure(AcquisitionOptions {
        channels: channels(&[Channel::A, Channel::B, Channel::C]),
        ..Default::default()
    });
    assert!(matches!(result, Err(Error::HardwareConstraintViolation(_))));
    assert!(device.driver().calls().is_empty());

    for set in [&[Channel::A][..], &[Channel::A, Channel::C][..], &Channel::ALL[..4]] {
        device.set_channels(channels(set)).unwrap();
        assert_eq!(device.channels().channel_count(), set.len());
        assert!(set.iter().all(|&channel| device.driver().channel(channel).is_some()));
    }
}

#[test]
fn timeout_without_trigger() {
    let mut device = device(SimulatedDigitizer::new(4, 14).without_triggers());
    device.configure(AcquisitionOptions { trigger_timeout: None, ..Default::default() }).unwrap();
    device.start_capture().unwrap();
    let started = Instant::now();
    let result = device.read_data(Some(Duration::from_millis(100)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(result, Err(Error::CaptureTimeout(timeout))
        if timeout == Duration::from_millis(100)));
    assert_eq!(device.state(), State::Draining);
    assert!(matches!(device.read_data(None), Err(Error::UnsupportedOperation(_))));
    assert!(device.get_data_as_record_list(Channel::A).is_err());
    device.end_capture().unwrap();
    assert_eq!(device.state(), State::Closed);
}

#[test]
fn zero_trigger_timeout_waits_for_trigger() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[trigger]\ntimeout_ms = 0").unwrap();
    let options = CaptureSettings::load(file.path()).unwrap().to_options().unwrap();
    let mut device = device(SimulatedDigitizer::new(4, 14).without_triggers());
    device.configure(options).unwrap();
    assert_eq!(device.driver().trigger_timeout(), None);
    device.start_capture().unwrap();
    let started = Instant::now();
    let result = device.read_data(Some(Duration::from_millis(100)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(result, Err(Error::CaptureTimeout(_))));
}

#[test]
fn trigger_timeout_triggers_automatically() {
    let mut device = device(SimulatedDigitizer::new(4, 14).without_triggers());
    device.configure(AcquisitionOptions {
        trigger_timeout: Some(Duration::from_millis(2)),
        records_per_capture: 3,
        ..Default::default()
    }).unwrap();
    device.start_capture().unwrap();
    let outcome = device.read_data(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(outcome, DrainOutcome::Complete { buffers: 3 });
}

#[test]
fn abort_keeps_completed_buffers() {
    let mut device = device(SimulatedDigitizer::new(4, 14));
    device.configure(AcquisitionOptions {
        mode: AcquisitionMode::TriggeredContinuous,
        channels: channels(&[Channel::A, Channel::B]),
        record_length: RecordLength::Samples(256),
        records_per_capture: 8,
        records_per_buffer: 1,
        buffer_count: 4,
        ..Default::default()
    }).unwrap();
    let abort = device.abort_handle();
    device.driver_mut().abort_after(3, abort);
    device.start_capture().unwrap();
    let outcome = device.read_data(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(outcome, DrainOutcome::Aborted { buffers: 3 });
    assert_eq!(device.state(), State::Idle);
    assert_eq!(device.get_data_as_record_list(Channel::B).unwrap().len(), 3);
    assert_eq!(device.driver().posted_buffers(), 0);
    device.end_capture().unwrap();
    assert_eq!(device.state(), State::Closed);
}

#[test]
fn abort_from_another_thread() {
    let mut device = device(SimulatedDigitizer::new(4, 14)
        .with_trigger_period(Duration::from_millis(5)));
    device.configure(AcquisitionOptions {
        records_per_capture: 1000,
        ..Default::default()
    }).unwrap();
    let abort = device.abort_handle();
    device.start_capture().unwrap();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        abort.abort();
    });
    let outcome = device.read_data(Some(Duration::from_secs(1))).unwrap();
    aborter.join().unwrap();
    assert!(matches!(outcome, DrainOutcome::Aborted { buffers } if buffers > 0 && buffers < 1000));
    let records = device.get_data_as_record_list(Channel::A).unwrap();
    assert_eq!(records.len(), outcome.buffers());
}

#[test]
fn continuous_stream_is_contiguous() {
    let mut device = device(SimulatedDigitizer::new(2, 12));
    device.configure(AcquisitionOptions {
        mode: AcquisitionMode::Continuous,
        channels: channels(&[Channel::A, Channel::B]),
        record_length: RecordLength::Samples(96),
        records_per_capture: 4,
        buffer_count: 2,
        ..Default::default()
    }).unwrap();
    assert_eq!(device.driver().trigger().map(|trigger| trigger.can_fire()), Some(false));
    device.start_capture().unwrap();
    assert_eq!(device.read_data(None).unwrap(), DrainOutcome::Complete { buffers: 4 });
    for channel in [Channel::A, Channel::B] {
        let stream = device.get_data_as_single_sequence(channel).unwrap();
        assert_eq!(stream.len(), 4 * 96);
        // the simulated waveform repeats every 64 samples
        assert!((0..stream.len() - 64).all(|index| stream[index] == stream[index + 64]));
    }
    assert_ne!(device.get_data_as_single_sequence(Channel::A).unwrap(),
        device.get_data_as_single_sequence(Channel::B).unwrap());
}

#[test]
fn triggered_continuous_packs_records() {
    let mut device = device(SimulatedDigitizer::new(4, 14));
    device.configure(AcquisitionOptions {
        mode: AcquisitionMode::TriggeredContinuous,
        channels: channels(&[Channel::A, Channel::B]),
        record_length: RecordLength::Samples(128),
        records_per_capture: 6,
        records_per_buffer: 4,
        ..Default::default()
    }).unwrap();
    let geometry = device.geometry().unwrap();
    assert_eq!(geometry.buffers_per_capture, 2);
    assert_eq!(geometry.bytes_per_buffer, 2 * 4 * 128 * 2);
    device.start_capture().unwrap();
    device.read_data(Some(Duration::from_secs(1))).unwrap();
    for channel in [Channel::A, Channel::B] {
        let records = device.get_data_as_record_list(channel).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|record| record == &records[0]));
    }
}

#[test]
fn single_mode_reads_onboard_memory() {
    let mut device = device(SimulatedDigitizer::new(4, 14)
        .with_trigger_period(Duration::from_millis(1)));
    device.configure(AcquisitionOptions {
        mode: AcquisitionMode::TriggeredRecordingSingleMode,
        record_length: RecordLength::Samples(256),
        pre_trigger_samples: 32,
        records_per_capture: 3,
        ..Default::default()
    }).unwrap();
    assert!(device.buffers().is_empty());
    assert_eq!(device.driver().record_count(), 3);
    device.start_capture().unwrap();
    assert_eq!(device.read_data(Some(Duration::from_secs(1))).unwrap(),
        DrainOutcome::Complete { buffers: 3 });
    let records = device.get_data_as_record_list(Channel::A).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[0][32].abs() < 1e-3);
    let calls = device.driver().calls();
    assert_eq!(calls.iter().filter(|&&call| call == "read_record").count(), 3);
    assert!(!calls.contains(&"before_async_read"));
}

#[test]
fn single_mode_respects_onboard_memory() {
    let mut device = device(SimulatedDigitizer::new(4, 14).with_onboard_memory(1024));
    let result = device.configure(AcquisitionOptions {
        mode: AcquisitionMode::TriggeredRecordingSingleMode,
        record_length: RecordLength::Samples(512),
        records_per_capture: 3,
        ..Default::default()
    });
    assert!(matches!(result, Err(Error::HardwareConstraintViolation(_))));
}

#[test]
fn failed_step_leaves_device_unconfigured() {
    let mut device = device(SimulatedDigitizer::new(4, 14).fail_on("configure_trigger"));
    assert!(matches!(device.configure(AcquisitionOptions::default()), Err(Error::Driver(_))));
    assert_eq!(device.state(), State::Unconfigured);
    assert_eq!(device.pending_steps().first(), Some(&ConfigStep::Trigger));
    assert!(!device.driver().calls().contains(&"set_trigger_timeout"));
    assert!(matches!(device.start_capture(), Err(Error::UnsupportedOperation(_))));
}

#[test]
fn buffer_allocation_failure() {
    let mut device = device(SimulatedDigitizer::new(4, 14).with_memory_limit(4096));
    let result = device.configure(AcquisitionOptions {
        record_length: RecordLength::Samples(2048),
        records_per_capture: 4,
        buffer_count: 2,
        ..Default::default()
    });
    assert!(matches!(result, Err(Error::Allocation { bytes: 4096 })));
    assert_eq!(device.driver().allocated_bytes(), 0);
    assert_eq!(device.state(), State::Unconfigured);
}
