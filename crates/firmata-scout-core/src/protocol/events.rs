//! Decoded event queue
//!
//! Inbound bytes are decoded by an [`EventSink`] and pushed into a channel;
//! the consumer drains an [`EventQueue`]. The handshake outcome is read from
//! the queue, never from a flag shared with the reader.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::codec::{DecodedEvent, FirmataDecoder, FirmwareVersion};
use super::transport::Link;
use super::ProtocolError;

/// Create a connected sink/queue pair
pub fn event_channel() -> (EventSink, EventQueue) {
    let (tx, rx) = channel();
    (
        EventSink {
            decoder: FirmataDecoder::new(),
            tx,
        },
        EventQueue { rx },
    )
}

/// Producer side: decodes bytes and publishes events
#[derive(Debug)]
pub struct EventSink {
    decoder: FirmataDecoder,
    tx: Sender<DecodedEvent>,
}

impl EventSink {
    /// Decode `bytes` and publish the resulting events; returns how many
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let events = self.decoder.feed(bytes);
        let count = events.len();
        for event in events {
            // Receiver gone means nobody is listening any more
            if self.tx.send(event).is_err() {
                break;
            }
        }
        count
    }

    /// Read whatever the link has buffered and publish it
    pub fn pump(&mut self, link: &mut dyn Link) -> Result<usize, ProtocolError> {
        let bytes = link.read_available()?;
        if bytes.is_empty() {
            return Ok(0);
        }
        tracing::trace!("pump: {} bytes {:02x?}", bytes.len(), bytes);
        Ok(self.push_bytes(&bytes))
    }

    /// Forget a partially received report (after a buffer discard)
    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}

/// Consumer side
#[derive(Debug)]
pub struct EventQueue {
    rx: Receiver<DecodedEvent>,
}

impl EventQueue {
    /// Take every event published so far
    pub fn drain(&self) -> Vec<DecodedEvent> {
        self.rx.try_iter().collect()
    }

    /// Drain the queue and return the last version report in it, if any.
    /// Unrecognised bytes are logged and dropped.
    pub fn latest_version(&self) -> Option<FirmwareVersion> {
        let mut version = None;
        for event in self.drain() {
            match event {
                DecodedEvent::VersionReport(v) => version = Some(v),
                DecodedEvent::UnrecognizedByte(b) => {
                    tracing::trace!("ignoring unrecognized byte 0x{b:02x}")
                }
            }
        }
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_to_queue() {
        let (mut sink, queue) = event_channel();
        assert_eq!(sink.push_bytes(&[0x00, 0xF9, 2, 5]), 2);
        assert_eq!(
            queue.drain(),
            vec![
                DecodedEvent::UnrecognizedByte(0x00),
                DecodedEvent::VersionReport(FirmwareVersion::new(2, 5)),
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_latest_version_across_split_pushes() {
        let (mut sink, queue) = event_channel();
        sink.push_bytes(&[0xF9, 2]);
        assert_eq!(queue.latest_version(), None);
        sink.push_bytes(&[6]);
        assert_eq!(queue.latest_version(), Some(FirmwareVersion::new(2, 6)));
    }

    #[test]
    fn test_sink_from_another_thread() {
        let (mut sink, queue) = event_channel();
        let handle = std::thread::spawn(move || {
            sink.push_bytes(&[0xF9, 2, 7]);
        });
        handle.join().unwrap();
        assert_eq!(queue.latest_version(), Some(FirmwareVersion::new(2, 7)));
    }
}
