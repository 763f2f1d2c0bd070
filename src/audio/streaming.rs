// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
// Read-ahead buffer for one mono PCM-16 source. A dedicated thread fills the
// buffer while the render thread works on the other sources. The buffer itself
// is handed back and forth over two capacity-1 channels, so whoever holds the
// Vec owns it and it can never be read while it is being refilled.
//
// Buffer layout: [overlap from previous chunk][new chunk]
//

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, span, warn, Level};

/// Anything we can stream little-endian PCM-16 from.
pub trait PcmStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> PcmStream for T {}

/// State of the producer side of a streaming source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferStatus {
    /// Filling normally.
    Running = 0,
    /// The stream ran out and looping is off. New chunks are silence.
    EndOfStream = 1,
    /// The producer thread exited cleanly.
    Quit = 2,
    /// The producer hit an I/O error and exited.
    ErrorQuit = 3,
}

impl BufferStatus {
    fn from_u8(value: u8) -> BufferStatus {
        match value {
            0 => BufferStatus::Running,
            1 => BufferStatus::EndOfStream,
            2 => BufferStatus::Quit,
            _ => BufferStatus::ErrorQuit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer of {buffer} samples cannot hold {overlap} samples of overlap plus new audio")]
    InvalidSize { buffer: usize, overlap: usize },

    #[error("unable to start buffering thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error while buffering: {0}")]
    Io(#[from] io::Error),

    #[error("buffering thread is no longer running")]
    Disconnected,
}

/// Read position and stream for one source. Only touched by the producer during a fill,
/// and by the consumer while the producer is idle.
struct Reader {
    stream: Option<Box<dyn PcmStream>>,
    start_offset: u64,
    data_len: Option<u64>,
    /// Bytes consumed since start_offset.
    position: u64,
    scratch: Vec<u8>,
}

impl Reader {
    fn seek_to_start(&mut self) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no stream configured"))?;
        stream.seek(SeekFrom::Start(self.start_offset))?;
        self.position = 0;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.data_len {
            Some(len) => len.saturating_sub(self.position).min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        if limit == 0 {
            return Ok(0);
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no stream configured"))?;
        let read = loop {
            match stream.read(&mut buf[..limit]) {
                Ok(read) => break read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.position += read as u64;
        Ok(read)
    }

    /// Fills `region` with the next samples. Returns true if the stream ended (looping
    /// off) before the region was full; the rest of the region is zeroed.
    fn fill(&mut self, region: &mut [i16], looping: bool) -> io::Result<bool> {
        let wanted = region.len() * 2;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(wanted, 0);

        let mut filled = 0;
        let mut ended = false;
        // Set after a wrap until data shows up again, so an empty stream can't spin.
        let mut wrapped = false;
        let result = loop {
            if filled == wanted {
                break Ok(());
            }
            match self.read_some(&mut scratch[filled..wanted]) {
                Ok(0) if looping && !wrapped => {
                    if let Err(e) = self.seek_to_start() {
                        break Err(e);
                    }
                    wrapped = true;
                }
                Ok(0) => {
                    ended = true;
                    break Ok(());
                }
                Ok(read) => {
                    filled += read;
                    wrapped = false;
                }
                Err(e) => break Err(e),
            }
        };

        scratch[filled..wanted].fill(0);
        for (sample, bytes) in region.iter_mut().zip(scratch.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        self.scratch = scratch;
        result.map(|_| ended)
    }
}

struct Shared {
    name: String,
    reader: Mutex<Reader>,
    status: AtomicU8,
    looping: AtomicBool,
}

impl Shared {
    fn status(&self) -> BufferStatus {
        BufferStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: BufferStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Fills the new-chunk region of the buffer, leaving the overlap untouched.
    fn fill(&self, region: &mut [i16]) -> io::Result<()> {
        let mut reader = self.reader.lock();
        if self.status() == BufferStatus::EndOfStream {
            region.fill(0);
            return Ok(());
        }
        if reader.fill(region, self.looping.load(Ordering::Relaxed))? {
            debug!(source = self.name, "End of stream.");
            self.set_status(BufferStatus::EndOfStream);
        }
        Ok(())
    }
}

/// A single-slot read-ahead buffer with its own producer thread.
///
/// The consumer alternates `request_next_chunk` and `acquire_buffer`. At most one fill is
/// ever in flight: the buffer is either held here or owned by the producer thread.
pub struct StreamingSource {
    shared: Arc<Shared>,
    overlap: usize,
    /// The buffer, when it isn't with the producer.
    held: Option<Vec<i16>>,
    request_tx: Option<Sender<Vec<i16>>>,
    ready_rx: Receiver<Vec<i16>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamingSource {
    /// Creates the source and its (idle) producer thread. The buffer starts zeroed and held
    /// by the consumer; nothing is read until a stream is configured and a chunk requested.
    pub fn new(
        name: &str,
        buffer_samples: usize,
        overlap_samples: usize,
    ) -> Result<StreamingSource, BufferError> {
        if overlap_samples >= buffer_samples {
            return Err(BufferError::InvalidSize {
                buffer: buffer_samples,
                overlap: overlap_samples,
            });
        }

        let shared = Arc::new(Shared {
            name: name.to_string(),
            reader: Mutex::new(Reader {
                stream: None,
                start_offset: 0,
                data_len: None,
                position: 0,
                scratch: Vec::with_capacity((buffer_samples - overlap_samples) * 2),
            }),
            status: AtomicU8::new(BufferStatus::Running as u8),
            looping: AtomicBool::new(false),
        });

        let (request_tx, request_rx) = crossbeam_channel::bounded::<Vec<i16>>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Vec<i16>>(1);
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("source-{name}"))
                .spawn(move || produce(shared, overlap_samples, request_rx, ready_tx))
                .map_err(BufferError::Spawn)?
        };

        Ok(StreamingSource {
            shared,
            overlap: overlap_samples,
            held: Some(vec![0; buffer_samples]),
            request_tx: Some(request_tx),
            ready_rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn overlap_samples(&self) -> usize {
        self.overlap
    }

    pub fn status(&self) -> BufferStatus {
        self.shared.status()
    }

    /// Whether reaching the end of the stream wraps back to the start offset.
    pub fn set_loop(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::Relaxed);
    }

    /// Points the source at a new stream. Reading starts at `start_offset` and, if given,
    /// stops after `data_len` bytes. Does not start filling.
    pub fn configure(
        &mut self,
        stream: Box<dyn PcmStream>,
        start_offset: u64,
        data_len: Option<u64>,
    ) -> Result<(), BufferError> {
        let buffer = self.reclaim()?;
        buffer.fill(0);
        {
            let mut reader = self.shared.reader.lock();
            reader.stream = Some(stream);
            reader.start_offset = start_offset;
            reader.data_len = data_len;
            reader.seek_to_start()?;
        }
        self.shared.set_status(BufferStatus::Running);
        Ok(())
    }

    /// Restarts the current stream from its start offset and clears any history. Waits
    /// for an in-flight fill to land first.
    pub fn rewind(&mut self) -> Result<(), BufferError> {
        let buffer = self.reclaim()?;
        buffer.fill(0);
        self.shared.reader.lock().seek_to_start()?;
        self.shared.set_status(BufferStatus::Running);
        Ok(())
    }

    /// Hands the buffer to the producer for the next fill. Never blocks. Does nothing if
    /// a fill is already in flight.
    pub fn request_next_chunk(&mut self) -> Result<(), BufferError> {
        let Some(buffer) = self.held.take() else {
            return Ok(());
        };
        let sent = match &self.request_tx {
            Some(request_tx) => request_tx.send(buffer).map_err(|e| e.into_inner()),
            None => Err(buffer),
        };
        // Keep the buffer if the producer is gone so later calls still see it.
        if let Err(buffer) = sent {
            self.held = Some(buffer);
            return Err(BufferError::Disconnected);
        }
        Ok(())
    }

    /// Blocks until the requested chunk is ready and returns the whole buffer. Calling
    /// again without a request returns the same buffer untouched.
    pub fn acquire_buffer(&mut self) -> Result<&mut [i16], BufferError> {
        Ok(self.reclaim()?.as_mut_slice())
    }

    fn reclaim(&mut self) -> Result<&mut Vec<i16>, BufferError> {
        if self.held.is_none() {
            let buffer = self.ready_rx.recv().map_err(|_| {
                self.shared.set_status(BufferStatus::ErrorQuit);
                BufferError::Disconnected
            })?;
            self.held = Some(buffer);
        }
        self.held.as_mut().ok_or(BufferError::Disconnected)
    }

    /// Stops the producer thread and releases the stream. Idempotent.
    pub fn dispose(&mut self) {
        self.request_tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(source = self.shared.name, "Buffering thread panicked.");
            }
        }
        self.shared.reader.lock().stream = None;
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn produce(
    shared: Arc<Shared>,
    overlap: usize,
    request_rx: Receiver<Vec<i16>>,
    ready_tx: Sender<Vec<i16>>,
) {
    let span = span!(Level::INFO, "buffering", source = shared.name);
    let _enter = span.enter();

    while let Ok(mut buffer) = request_rx.recv() {
        let result = shared.fill(&mut buffer[overlap..]);
        if let Err(e) = &result {
            error!(err = %e, "Unable to read source audio.");
            shared.set_status(BufferStatus::ErrorQuit);
        }
        if ready_tx.send(buffer).is_err() || result.is_err() {
            break;
        }
    }

    if shared.status() != BufferStatus::ErrorQuit {
        shared.set_status(BufferStatus::Quit);
    }
    debug!("Buffering thread stopped.");
}
