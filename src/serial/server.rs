// Serial request server
//
// A blocking reader thread decodes frames from the link and queues them.
// Consumers pop requests from the control side without touching the port.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use super::frame::{FrameDecoder, Request};
use crate::config::SERIAL_TIMEOUT;
use crate::error::Result;

type Queue = Arc<Mutex<VecDeque<Request>>>;

fn lock(queue: &Queue) -> MutexGuard<'_, VecDeque<Request>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RequestServer {
    queue: Queue,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl RequestServer {
    /// Start reading frames from `source` on a dedicated thread
    pub fn start<R: Read + Send + 'static>(source: R) -> Self {
        Self::start_with(source, FrameDecoder::new())
    }

    /// Like `start`, with a caller-configured decoder
    pub fn start_with<R: Read + Send + 'static>(source: R, decoder: FrameDecoder) -> Self {
        let queue: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));
        let reader = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            std::thread::spawn(move || read_loop(source, decoder, queue, running))
        };
        Self {
            queue,
            running,
            reader: Some(reader),
        }
    }

    /// Open a serial port and serve requests from it
    ///
    /// A strict server rejects frames carrying the legacy constant checksum.
    pub fn open(port_name: &str, baudrate: u32, strict: bool) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        info!("Serving requests on {} at {} baud", port_name, baudrate);
        let decoder = if strict {
            FrameDecoder::strict()
        } else {
            FrameDecoder::new()
        };
        Ok(Self::start_with(port, decoder))
    }

    /// Take the oldest queued request
    pub fn pop(&self) -> Option<Request> {
        lock(&self.queue).pop_front()
    }

    /// Take up to `max` queued requests, oldest first
    pub fn drain(&self, max: usize) -> Vec<Request> {
        let mut queue = lock(&self.queue);
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Whether the reader thread is still consuming the link
    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }
}

impl Drop for RequestServer {
    fn drop(&mut self) {
        // The reader notices within one read timeout; it is not joined
        self.running.store(false, Ordering::Relaxed);
        self.reader.take();
    }
}

fn read_loop<R: Read>(
    mut source: R,
    mut decoder: FrameDecoder,
    queue: Queue,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 64];
    while running.load(Ordering::Relaxed) {
        match source.read(&mut buf) {
            Ok(0) => {
                info!("Serial link closed");
                break;
            }
            Ok(n) => {
                let requests = decoder.extend(&buf[..n]);
                if !requests.is_empty() {
                    debug!("Queued {} serial requests", requests.len());
                    lock(&queue).extend(requests);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::frame::encode_request;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    fn request(command_id: u16) -> Request {
        Request {
            return_id: 7,
            command_id,
            payload: vec![command_id as u8],
        }
    }

    fn wait_for_reader(server: &RequestServer) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while server.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_queues_requests_in_order() {
        let mut bytes = Vec::new();
        for id in [1, 2, 3] {
            bytes.extend(encode_request(&request(id)).unwrap());
        }
        let server = RequestServer::start(Cursor::new(bytes));
        wait_for_reader(&server);

        assert_eq!(server.len(), 3);
        assert_eq!(server.pop(), Some(request(1)));
        assert_eq!(server.drain(10), vec![request(2), request(3)]);
        assert!(server.is_empty());
    }

    #[test]
    fn test_drain_respects_max() {
        let mut bytes = Vec::new();
        for id in 0..5 {
            bytes.extend(encode_request(&request(id)).unwrap());
        }
        let server = RequestServer::start(Cursor::new(bytes));
        wait_for_reader(&server);

        assert_eq!(server.drain(2).len(), 2);
        assert_eq!(server.len(), 3);
    }

    #[test]
    fn test_corrupt_frames_skipped() {
        let mut bad = encode_request(&request(1)).unwrap();
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);
        bad.extend(encode_request(&request(2)).unwrap());

        let server = RequestServer::start(Cursor::new(bad));
        wait_for_reader(&server);
        assert_eq!(server.drain(10), vec![request(2)]);
    }

    #[test]
    fn test_legacy_frames_follow_decoder_mode() {
        let mut bytes = vec![0xAA, 0x55, 0x1E, 0x05, 0x00, 0x07, 0x00, 0x03, 0x03, 0xC6];
        bytes.extend(encode_request(&request(4)).unwrap());

        let lenient = RequestServer::start(Cursor::new(bytes.clone()));
        wait_for_reader(&lenient);
        assert_eq!(lenient.drain(10), vec![request(3), request(4)]);

        let strict = RequestServer::start_with(Cursor::new(bytes), FrameDecoder::strict());
        wait_for_reader(&strict);
        assert_eq!(strict.drain(10), vec![request(4)]);
    }
}
