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
// Output to a real device through cpal. The render thread writes internal
// blocks; they are resampled if needed, cut into native-size buffers and
// queued. The queue holds `ring_buffer_multiplier` buffers, so a full queue
// blocks the writer. The device callback never blocks: on underrun it plays
// silence.
//
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use rubato::{
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, VecResampler,
    WindowFunction,
};
use tracing::{error, info, span, warn, Level};

use super::{OutputError, OutputSettings, OutputSink};

/// How long a write or flush waits on a device that stopped pulling audio.
const DEVICE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A queued item for the device callback.
enum Chunk {
    Audio(Vec<f32>),
    /// Pauses the callback once everything before it has played.
    PauseMarker,
}

/// An output device as seen when listing.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

struct Resampling {
    resampler: SincFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

/// A sink that plays through a cpal output device.
pub struct Sink {
    name: String,
    settings: OutputSettings,
    /// Moved into the stream thread on start.
    device: Option<cpal::Device>,
    queue_tx: Sender<Chunk>,
    queue_rx: Receiver<Chunk>,
    paused_tx: Sender<()>,
    paused_rx: Receiver<()>,
    playing: Arc<AtomicBool>,
    /// Tells the callback to drop whatever it was in the middle of.
    discard: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    /// Interleaved native frames not yet making up a full buffer.
    pending: Vec<f32>,
    resampling: Option<Resampling>,
    stream_thread: Option<JoinHandle<()>>,
}

impl Sink {
    /// Sets up a sink on the named device ("default" for the host default).
    pub fn new(name: &str, settings: OutputSettings) -> Result<Sink, OutputError> {
        settings.validate()?;
        let device = find_device(name)?;

        let resampling = if settings.internal_sample_rate != settings.native_sample_rate {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                oversampling_factor: 128,
                interpolation: SincInterpolationType::Linear,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(
                f64::from(settings.native_sample_rate) / f64::from(settings.internal_sample_rate),
                1.0,
                params,
                settings.internal_block_frames,
                2,
            )
            .map_err(|e| OutputError::Resampler(e.to_string()))?;
            let output = resampler.output_buffer_allocate(true);
            Some(Resampling {
                resampler,
                input: vec![vec![0.0; settings.internal_block_frames]; 2],
                output,
            })
        } else {
            None
        };

        let (queue_tx, queue_rx) = crossbeam_channel::bounded(settings.ring_buffer_multiplier);
        let (paused_tx, paused_rx) = crossbeam_channel::bounded(1);
        info!(
            device = name,
            internal_rate = settings.internal_sample_rate,
            native_rate = settings.native_sample_rate,
            native_block_frames = settings.native_block_frames,
            queue = settings.ring_buffer_multiplier,
            "Output configured."
        );

        Ok(Sink {
            name: name.to_string(),
            pending: Vec::with_capacity(settings.native_block_frames * 4),
            settings,
            device: Some(device),
            queue_tx,
            queue_rx,
            paused_tx,
            paused_rx,
            playing: Arc::new(AtomicBool::new(false)),
            discard: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            resampling,
            stream_thread: None,
        })
    }

    fn native_block_samples(&self) -> usize {
        self.settings.native_block_frames * 2
    }

    fn enqueue(&self, chunk: Chunk) -> Result<(), OutputError> {
        self.queue_tx
            .send_timeout(chunk, DEVICE_STALL_TIMEOUT)
            .map_err(|e| match e {
                crossbeam_channel::SendTimeoutError::Timeout(_) => {
                    OutputError::Device("output device stopped pulling audio".into())
                }
                crossbeam_channel::SendTimeoutError::Disconnected(_) => OutputError::Closed,
            })
    }
}

impl OutputSink for Sink {
    fn start(&mut self) -> Result<(), OutputError> {
        let device = self.device.take().ok_or(OutputError::Closed)?;
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: self.settings.native_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), OutputError>>(1);
        let queue_rx = self.queue_rx.clone();
        let playing = self.playing.clone();
        let discard = self.discard.clone();
        let paused_tx = self.paused_tx.clone();
        let stop = self.stop.clone();
        let name = self.name.clone();

        self.playing.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || {
                let span = span!(Level::INFO, "output stream", device = name);
                let _enter = span.enter();

                let stream =
                    match build_stream(&device, &config, queue_rx, playing, discard, paused_tx) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(OutputError::Device(e.to_string())));
                    return;
                }
                info!("Output stream started.");
                let _ = ready_tx.send(Ok(()));

                // The stream lives as long as this thread does.
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(STREAM_POLL_INTERVAL);
                }
                drop(stream);
                info!("Output stream stopped.");
            })
            .map_err(|e| OutputError::Device(e.to_string()))?;
        self.stream_thread = Some(thread);

        let result = ready_rx.recv().unwrap_or(Err(OutputError::Closed));
        if result.is_err() {
            self.playing.store(false, Ordering::Release);
        }
        result
    }

    fn write(&mut self, block: &[i16]) -> Result<(), OutputError> {
        let expected = self.settings.internal_block_frames * 2;
        if block.len() != expected {
            return Err(OutputError::BlockSize {
                expected,
                actual: block.len(),
            });
        }
        // Nothing drains the queue while paused.
        if !self.playing.load(Ordering::Acquire) {
            return Ok(());
        }

        match &mut self.resampling {
            Some(resampling) => {
                for (i, frame) in block.chunks_exact(2).enumerate() {
                    resampling.input[0][i] = to_f32(frame[0]);
                    resampling.input[1][i] = to_f32(frame[1]);
                }
                let (_, produced) = resampling
                    .resampler
                    .process_into_buffer(&resampling.input, &mut resampling.output, None)
                    .map_err(|e| OutputError::Resampler(e.to_string()))?;
                for i in 0..produced {
                    self.pending.push(resampling.output[0][i]);
                    self.pending.push(resampling.output[1][i]);
                }
            }
            None => self.pending.extend(block.iter().map(|s| to_f32(*s))),
        }

        let native = self.native_block_samples();
        while self.pending.len() >= native {
            let chunk: Vec<f32> = self.pending.drain(..native).collect();
            self.enqueue(Chunk::Audio(chunk))?;
        }
        Ok(())
    }

    fn play(&mut self) {
        while self.queue_rx.try_recv().is_ok() {}
        while self.paused_rx.try_recv().is_ok() {}
        self.pending.clear();
        self.discard.store(true, Ordering::Release);
        self.playing.store(true, Ordering::Release);
    }

    fn pause(&mut self) {
        self.playing.store(false, Ordering::Release);
    }

    fn flush_and_pause(&mut self) {
        if !self.playing.load(Ordering::Acquire) {
            return;
        }
        while self.paused_rx.try_recv().is_ok() {}

        if !self.pending.is_empty() {
            let mut chunk = std::mem::take(&mut self.pending);
            chunk.resize(self.native_block_samples(), 0.0);
            if let Err(e) = self.enqueue(Chunk::Audio(chunk)) {
                warn!(err = %e, "Unable to flush output.");
            }
        }
        let drained = self.enqueue(Chunk::PauseMarker).is_ok()
            && self.paused_rx.recv_timeout(DEVICE_STALL_TIMEOUT).is_ok();
        if !drained {
            warn!(device = self.name, "Output did not drain before pausing.");
        }
        self.playing.store(false, Ordering::Release);
    }

    fn shutdown(&mut self) {
        self.playing.store(false, Ordering::Release);
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.stream_thread.take() {
            if thread.join().is_err() {
                error!(device = self.name, "Output stream thread panicked.");
            }
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cpal)", self.name)
    }
}

#[inline]
fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Receiver<Chunk>,
    playing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    paused_tx: Sender<()>,
) -> Result<cpal::Stream, OutputError> {
    let sample_format = device
        .default_output_config()
        .map_err(|e| OutputError::Device(e.to_string()))?
        .sample_format();
    let on_error = |err: cpal::StreamError| error!("cpal output stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            config,
            create_callback::<f32>(queue, playing, discard, paused_tx),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            config,
            create_callback::<i16>(queue, playing, discard, paused_tx),
            on_error,
            None,
        ),
        cpal::SampleFormat::I32 => device.build_output_stream(
            config,
            create_callback::<i32>(queue, playing, discard, paused_tx),
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            config,
            create_callback::<u16>(queue, playing, discard, paused_tx),
            on_error,
            None,
        ),
        other => {
            return Err(OutputError::Device(format!(
                "unsupported device sample format {:?}",
                other
            )))
        }
    };
    stream.map_err(|e| OutputError::Device(e.to_string()))
}

/// Callback-side state: pulls queued buffers into the device buffer.
struct Feeder {
    queue: Receiver<Chunk>,
    playing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    paused_tx: Sender<()>,
    current: Vec<f32>,
    position: usize,
}

impl Feeder {
    fn new(
        queue: Receiver<Chunk>,
        playing: Arc<AtomicBool>,
        discard: Arc<AtomicBool>,
        paused_tx: Sender<()>,
    ) -> Feeder {
        Feeder {
            queue,
            playing,
            discard,
            paused_tx,
            current: Vec::new(),
            position: 0,
        }
    }

    /// Fills `data`, converting to the device sample type. Never blocks.
    fn fill<T>(&mut self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        if self.discard.swap(false, Ordering::AcqRel) {
            self.current.clear();
            self.position = 0;
        }

        let mut written = 0;
        while written < data.len() && self.playing.load(Ordering::Acquire) {
            if self.position == self.current.len() {
                match self.queue.try_recv() {
                    Ok(Chunk::Audio(chunk)) => {
                        self.current = chunk;
                        self.position = 0;
                    }
                    Ok(Chunk::PauseMarker) => {
                        self.playing.store(false, Ordering::Release);
                        let _ = self.paused_tx.try_send(());
                    }
                    Err(_) => break,
                }
                continue;
            }

            let count = (self.current.len() - self.position).min(data.len() - written);
            for (out, sample) in data[written..written + count]
                .iter_mut()
                .zip(&self.current[self.position..self.position + count])
            {
                *out = T::from_sample(*sample);
            }
            written += count;
            self.position += count;
        }

        for out in data[written..].iter_mut() {
            *out = T::from_sample(0.0f32);
        }
    }
}

fn create_callback<T>(
    queue: Receiver<Chunk>,
    playing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    paused_tx: Sender<()>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut feeder = Feeder::new(queue, playing, discard, paused_tx);
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| feeder.fill(data)
}

/// Finds an output device by name across all hosts.
fn find_device(name: &str) -> Result<cpal::Device, OutputError> {
    // Suppress noisy backend output while probing.
    let _shh_stdout = shh::stdout().map_err(|e| OutputError::Device(e.to_string()))?;
    let _shh_stderr = shh::stderr().map_err(|e| OutputError::Device(e.to_string()))?;

    if name == "default" {
        return cpal::default_host()
            .default_output_device()
            .ok_or_else(|| OutputError::NoDevice(name.to_string()));
    }

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                warn!(err = %e, host = host_id.name(), "Host unavailable");
                continue;
            }
        };
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(err = %e, host = host_id.name(), "Unable to list devices for host");
                continue;
            }
        };
        for device in devices {
            if device.name().is_ok_and(|device_name| device_name.trim() == name) {
                return Ok(device);
            }
        }
    }
    Err(OutputError::NoDevice(name.to_string()))
}

/// Lists stereo-capable output devices across all hosts.
pub fn list_devices() -> Result<Vec<DeviceInfo>, OutputError> {
    let _shh_stdout = shh::stdout().map_err(|e| OutputError::Device(e.to_string()))?;
    let _shh_stderr = shh::stderr().map_err(|e| OutputError::Device(e.to_string()))?;

    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id).map(|host| host.output_devices()) {
            Ok(Ok(host_devices)) => host_devices,
            Ok(Err(e)) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
            Err(e) => {
                error!(err = e.to_string(), host = host_id.name(), "Host unavailable");
                continue;
            }
        };

        for device in host_devices {
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = configs.map(|c| c.channels()).max().unwrap_or(0);
            if max_channels < 2 {
                continue;
            }
            let Ok(name) = device.name() else {
                continue;
            };
            devices.push(DeviceInfo {
                name,
                host: host_id.name().to_string(),
                max_channels,
            });
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

#[cfg(test)]
mod test {
    use super::*;

    fn feeder() -> (Feeder, Sender<Chunk>, Receiver<()>) {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(4);
        let (paused_tx, paused_rx) = crossbeam_channel::bounded(1);
        let feeder = Feeder::new(
            queue_rx,
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicBool::new(false)),
            paused_tx,
        );
        (feeder, queue_tx, paused_rx)
    }

    #[test]
    fn test_plays_queue_then_pauses_on_marker() {
        let (mut feeder, queue_tx, paused_rx) = feeder();

        // Two 4 sample buffers read through a 3 sample device buffer.
        queue_tx.send(Chunk::Audio(vec![0.1, 0.2, 0.3, 0.4])).unwrap();
        queue_tx.send(Chunk::Audio(vec![0.5, 0.6, 0.7, 0.8])).unwrap();
        queue_tx.send(Chunk::PauseMarker).unwrap();

        let mut data = [1.0f32; 3];
        feeder.fill(&mut data);
        assert_eq!([0.1, 0.2, 0.3], data);
        feeder.fill(&mut data);
        assert_eq!([0.4, 0.5, 0.6], data);
        feeder.fill(&mut data);
        assert_eq!([0.7, 0.8, 0.0], data);
        assert!(!feeder.playing.load(Ordering::Acquire));
        assert!(paused_rx.try_recv().is_ok());

        // Paused: silence, and the queue isn't touched.
        queue_tx.send(Chunk::Audio(vec![0.9; 3])).unwrap();
        feeder.fill(&mut data);
        assert_eq!([0.0; 3], data);
        assert_eq!(1, queue_tx.len());
    }

    #[test]
    fn test_underrun_and_discard() {
        let (mut feeder, queue_tx, _paused_rx) = feeder();

        let mut data = [7i16; 4];
        feeder.fill(&mut data);
        assert_eq!([0; 4], data);

        queue_tx.send(Chunk::Audio(vec![0.5; 6])).unwrap();
        feeder.fill(&mut data);
        assert!(data.iter().all(|s| *s > 0));

        // The two samples left over from before are dropped.
        feeder.discard.store(true, Ordering::Release);
        feeder.fill(&mut data);
        assert_eq!([0; 4], data);
    }

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo {
            name: "UMC404HD".into(),
            host: "ALSA".into(),
            max_channels: 4,
        };
        assert_eq!("UMC404HD (Channels=4) (ALSA)", info.to_string());
    }
}
