use std::collections::BTreeMap;

use crate::{Error, Result};
use crate::config::Channel;
use crate::mode::BufferLayout;

/// Raw records captured since the last arm, sorted by channel.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    channels: Vec<Channel>,
    records: BTreeMap<Channel, Vec<Vec<u16>>>,
    samples_per_record: usize,
    records_per_capture: usize,
    ready: bool,
}

impl CaptureSession {
    pub fn new() -> CaptureSession {
        Default::default()
    }

    /// Discard all records and prepare to receive a capture of `records_per_capture` records
    /// of `samples_per_record` samples for each of `channels`.
    pub fn reset<I>(&mut self, channels: I, samples_per_record: usize, records_per_capture: usize)
            where I: IntoIterator<Item = Channel> {
        self.channels = channels.into_iter().collect();
        self.channels.sort();
        self.records = self.channels.iter()
            .map(|&channel| (channel, Vec::with_capacity(records_per_capture)))
            .collect();
        self.samples_per_record = samples_per_record;
        self.records_per_capture = records_per_capture;
        self.ready = false;
    }

    /// Split the buffer with sequence number `sequence` into records.
    ///
    /// Records past the end of the capture, present when the last buffer is not full, are
    /// dropped.
    pub fn ingest(&mut self, layout: BufferLayout, sequence: usize, records_per_buffer: usize,
                  words: &[u16]) -> Result<()> {
        let samples = self.samples_per_record;
        let channel_count = self.channels.len();
        let needed = samples * records_per_buffer * channel_count;
        if words.len() < needed {
            return Err(Error::constraint(format!("buffer holds {} samples, expected {}",
                words.len(), needed)))
        }
        let first_record = sequence * records_per_buffer;
        let records = records_per_buffer
            .min(self.records_per_capture.saturating_sub(first_record));
        if records < records_per_buffer {
            log::debug!("capture session: dropping {} records past the end of the capture",
                records_per_buffer - records);
        }
        for (slot, channel) in self.channels.iter().enumerate() {
            let Some(list) = self.records.get_mut(channel) else { continue };
            for record in 0..records {
                let offset = match layout {
                    BufferLayout::ChannelMajor => (slot * records_per_buffer + record) * samples,
                    BufferLayout::RecordMajor => (record * channel_count + slot) * samples,
                };
                list.push(words[offset..offset + samples].to_vec());
            }
        }
        Ok(())
    }

    /// Append one record read out of on-board memory.
    pub fn push_record(&mut self, channel: Channel, record: Vec<u16>) -> Result<()> {
        let list = self.records.get_mut(&channel)
            .ok_or_else(|| Error::invalid(format!("channel {} is not part of the capture",
                channel)))?;
        list.push(record);
        Ok(())
    }

    pub fn mark_ready(&mut self) {
        self.ready = true
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn samples_per_record(&self) -> usize {
        self.samples_per_record
    }

    /// Number of complete records, counting those present on every channel.
    pub fn records_captured(&self) -> usize {
        self.records.values().map(Vec::len).min().unwrap_or(0)
    }

    pub fn records(&self, channel: Channel) -> Option<&[Vec<u16>]> {
        self.records.get(&channel).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Word value encodes (channel slot, record, sample) for two channels of four samples.
    fn buffer(layout: BufferLayout, records: usize) -> Vec<u16> {
        let mut words = vec![0; 2 * records * 4];
        for slot in 0..2 {
            for record in 0..records {
                let offset = match layout {
                    BufferLayout::ChannelMajor => (slot * records + record) * 4,
                    BufferLayout::RecordMajor => (record * 2 + slot) * 4,
                };
                for sample in 0..4 {
                    words[offset + sample] = (slot * 100 + record * 10 + sample) as u16;
                }
            }
        }
        words
    }

    #[test]
    fn test_layouts_agree() {
        for layout in [BufferLayout::ChannelMajor, BufferLayout::RecordMajor] {
            let mut session = CaptureSession::new();
            session.reset([Channel::B, Channel::A], 4, 3);
            session.ingest(layout, 0, 3, &buffer(layout, 3)).unwrap();
            assert_eq!(session.records_captured(), 3);
            assert_eq!(session.records(Channel::A).unwrap()[2], [20, 21, 22, 23]);
            assert_eq!(session.records(Channel::B).unwrap()[1], [110, 111, 112, 113]);
        }
    }

    #[test]
    fn test_excess_records_dropped() {
        let mut session = CaptureSession::new();
        session.reset([Channel::A, Channel::B], 4, 3);
        let words = buffer(BufferLayout::RecordMajor, 2);
        session.ingest(BufferLayout::RecordMajor, 0, 2, &words).unwrap();
        session.ingest(BufferLayout::RecordMajor, 1, 2, &words).unwrap();
        assert_eq!(session.records_captured(), 3);
        assert_eq!(session.records(Channel::B).unwrap()[2], [100, 101, 102, 103]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut session = CaptureSession::new();
        session.reset([Channel::A], 4, 1);
        assert!(session.ingest(BufferLayout::ChannelMajor, 0, 1, &[0; 3]).is_err());
        assert!(session.push_record(Channel::C, vec![0; 4]).is_err());
        assert!(!session.is_ready());
    }
}
