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
// The render session: one thread that pulls a chunk from every source, filters
// it through the convolution engine, applies transport changes at the block
// boundary and writes the block to the sink.
//
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::convolver::{ConvolutionEngine, FilterError, HrtfConvolver};
use crate::audio::format::WavError;
use crate::audio::streaming::{BufferError, BufferStatus, StreamingSource};
use crate::audio::thread_priority::{
    configure_render_thread_priority, render_thread_priority, rt_audio_enabled,
};
use crate::audio::{BufferSizing, OutputError, OutputSink, WavInfo};
use crate::config::ConfigError;
use crate::hrir::Hrirs;
use crate::scene::{Observer, Scene, TransportState};

pub mod spatial;
mod transport;


pub use transport::{BlockActions, Transport, TransportPhase, Wake};

/// Only 16 bit sources are rendered.
const SUPPORTED_BITS_PER_SAMPLE: u16 = 16;

/// Errors that stop a session from starting. Nothing is left running.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scene declares {0} bits per sample, only 16 is supported")]
    UnsupportedBitsPerSample(u16),

    #[error("buffer sizing is for {expected} filter taps, HRIRs have {actual}")]
    FilterLength { expected: usize, actual: usize },

    #[error(transparent)]
    Wav(#[from] WavError),

    #[error("unable to open source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to set up source {name}: {source}")]
    Buffer {
        name: String,
        #[source]
        source: BufferError,
    },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("unable to start render thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors reported by a running session. The session quits after reporting one.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("filter engine failed: {0}")]
    FilterEngine(#[source] FilterError),

    #[error("buffering failed for source {source_name}")]
    Buffering { source_name: String },

    #[error("output failed: {0}")]
    Output(#[source] OutputError),
}

/// Runs the checks `RenderEngine::setup` makes before opening anything: supported bit
/// depth, a filter length matching the sizing, and every source a streamable WAV file.
/// Returns each source's WAV info in scene order.
pub fn verify(
    scene: &Scene,
    hrirs: &Hrirs,
    sizing: &BufferSizing,
) -> Result<Vec<WavInfo>, SetupError> {
    if scene.bits_per_sample() != SUPPORTED_BITS_PER_SAMPLE {
        return Err(SetupError::UnsupportedBitsPerSample(
            scene.bits_per_sample(),
        ));
    }
    if sizing.filter_overlap_samples + 1 != hrirs.filter_len() {
        return Err(SetupError::FilterLength {
            expected: sizing.filter_overlap_samples + 1,
            actual: hrirs.filter_len(),
        });
    }

    scene
        .sources()
        .iter()
        .map(|source| -> Result<WavInfo, SetupError> {
            let info = WavInfo::read(source.path())?;
            info.check_streamable(scene.sample_rate(), SUPPORTED_BITS_PER_SAMPLE)?;
            Ok(info)
        })
        .collect()
}

/// A running render session. Dropping it shuts the session down.
pub struct RenderEngine {
    scene: Arc<Scene>,
    transport: Arc<Transport>,
    sizing: BufferSizing,
    errors_rx: Receiver<SessionError>,
    thread: Option<JoinHandle<()>>,
}

impl RenderEngine {
    /// Validates the scene against the HRIRs and sizing, opens every source and starts
    /// rendering to the sink.
    pub fn setup(
        scene: Arc<Scene>,
        hrirs: &Hrirs,
        sizing: BufferSizing,
        sink: Box<dyn OutputSink>,
    ) -> Result<RenderEngine, SetupError> {
        let infos = verify(&scene, hrirs, &sizing)?;

        let mut sources = Vec::with_capacity(infos.len());
        for (source, info) in scene.sources().iter().zip(infos) {
            let file = File::open(source.path()).map_err(|e| SetupError::Open {
                path: source.path().to_path_buf(),
                source: e,
            })?;

            let buffer_error = |e| SetupError::Buffer {
                name: source.name().to_string(),
                source: e,
            };
            let mut streaming = StreamingSource::new(
                source.name(),
                sizing.source_buffer_samples(),
                sizing.overlap_samples(),
            )
            .map_err(buffer_error)?;
            streaming.set_loop(source.looping());
            streaming
                .configure(
                    Box::new(BufReader::new(file)),
                    info.first_audio_byte_offset,
                    Some(info.data_len),
                )
                .map_err(buffer_error)?;
            streaming.request_next_chunk().map_err(buffer_error)?;
            debug!(source = source.name(), wav = %info, "Source ready.");
            sources.push(streaming);
        }

        let convolver = HrtfConvolver::new(
            hrirs,
            sizing.fft_block_samples,
            sizing.crossfade_overlap_samples,
            sizing.fft_padding_samples,
        )?;
        RenderEngine::start(scene, sources, Box::new(convolver), sizing, sink)
    }

    /// Starts the render thread over already configured sources, one per scene source
    /// and in the same order, each with its first chunk requested.
    pub(crate) fn start(
        scene: Arc<Scene>,
        sources: Vec<StreamingSource>,
        engine: Box<dyn ConvolutionEngine>,
        sizing: BufferSizing,
        sink: Box<dyn OutputSink>,
    ) -> Result<RenderEngine, SetupError> {
        if sources.len() != scene.sources().len() {
            return Err(SetupError::Config(ConfigError::InvalidScene(format!(
                "{} streams for {} sources",
                sources.len(),
                scene.sources().len()
            ))));
        }

        let transport = Arc::new(Transport::new());
        let (errors_tx, errors_rx) = crossbeam_channel::bounded(1);
        info!(
            sources = sources.len(),
            sink = %sink,
            sizing = %sizing,
            "Starting render session."
        );

        let render_loop = RenderLoop {
            volume_fraction: scene.volume() / 100.0,
            scene: scene.clone(),
            transport: transport.clone(),
            sources,
            engine,
            sink,
            errors_tx,
            output: vec![0; sizing.output_block_samples()],
            block_frames: sizing.block_samples,
            crossfade: true,
            failed: false,
        };
        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || render_loop.run())
            .map_err(SetupError::Spawn)?;

        Ok(RenderEngine {
            scene,
            transport,
            sizing,
            errors_rx,
            thread: Some(thread),
        })
    }

    pub fn play(&self) {
        self.transport.play();
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    pub fn rewind(&self) {
        self.transport.rewind();
    }

    /// Asks the session to finish. Use `shutdown` to also wait for it.
    pub fn quit(&self) {
        self.transport.quit();
    }

    pub fn transport_phase(&self) -> TransportPhase {
        self.transport.phase()
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn sizing(&self) -> &BufferSizing {
        &self.sizing
    }

    /// Session failures. At most one is ever sent.
    pub fn errors(&self) -> &Receiver<SessionError> {
        &self.errors_rx
    }

    /// Whether the render thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }

    /// Quits and waits for the render thread. Sources, engine and sink are released
    /// before this returns.
    pub fn shutdown(&mut self) {
        self.transport.quit();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Render thread panicked.");
            }
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the render thread.
struct RenderLoop {
    scene: Arc<Scene>,
    transport: Arc<Transport>,
    sources: Vec<StreamingSource>,
    engine: Box<dyn ConvolutionEngine>,
    sink: Box<dyn OutputSink>,
    errors_tx: Sender<SessionError>,
    output: Vec<i16>,
    block_frames: usize,
    volume_fraction: f32,
    /// Cleared for the one block after a rewind.
    crossfade: bool,
    failed: bool,
}

impl RenderLoop {
    fn run(mut self) {
        let span = span!(Level::INFO, "render");
        let _enter = span.enter();

        configure_render_thread_priority(render_thread_priority(), rt_audio_enabled());

        match self.sink.start() {
            Ok(()) => self.render(),
            Err(e) => self.fail(SessionError::Output(e)),
        }

        self.sink.pause();
        self.sink.shutdown();
        self.scene.set_transport_state(TransportState::Paused);
        self.transport.set_phase(TransportPhase::Quit);
        info!("Render session finished.");
        // Sources and the engine are released when self drops here.
    }

    fn render(&mut self) {
        loop {
            if self.scene.take_volume_changed(Observer::Renderer) {
                self.volume_fraction = self.scene.volume() / 100.0;
            }

            let all_ended = match self.render_block() {
                Ok(all_ended) => all_ended,
                Err(e) => {
                    self.fail(e);
                    self.output.fill(0);
                    false
                }
            };

            let actions = self.transport.consume(all_ended);
            if actions.resume {
                self.sink.play();
                self.scene.set_transport_state(TransportState::Playing);
                info!("Playing.");
            }
            if let Some(direction) = actions.fade {
                self.sink
                    .linear_fade(&mut self.output, self.block_frames, direction);
            }
            if let Err(e) = self.sink.write(&self.output) {
                // The sink is gone, so there's nothing left to drain.
                self.fail(SessionError::Output(e));
                return;
            }
            if actions.quit || actions.pause {
                self.sink.flush_and_pause();
            }
            if actions.quit {
                info!("Quitting.");
                return;
            }

            let mut rewind = actions.rewind;
            if actions.pause {
                self.scene.set_transport_state(TransportState::Paused);
                info!("Paused.");
                match self.transport.wait_for_resume() {
                    Wake::Quit => {
                        info!("Quitting while paused.");
                        return;
                    }
                    Wake::Resume { rewind: pending } => rewind |= pending,
                }
            }
            if rewind {
                if let Err(e) = self.rewind_sources() {
                    self.fail(e);
                }
            }
        }
    }

    /// Renders one block into the output buffer. Returns whether every source has
    /// ended without looping.
    fn render_block(&mut self) -> Result<bool, SessionError> {
        self.engine.begin_block();
        let listener_azimuth = self.scene.listener().azimuth();
        let mut all_ended = !self.sources.is_empty();

        for (source, streaming) in self.scene.sources().iter().zip(self.sources.iter_mut()) {
            let buffering_error = |e: BufferError| {
                error!(source = source.name(), err = %e, "Buffering failed.");
                SessionError::Buffering {
                    source_name: source.name().to_string(),
                }
            };

            let overlap = streaming.overlap_samples();
            let buffer = streaming.acquire_buffer().map_err(buffering_error)?;
            if !source.is_muted() {
                let (x, y) = source.position();
                let gain = spatial::source_gain(self.volume_fraction, x, y);
                let angle = spatial::hrir_angle(x, y, listener_azimuth);
                self.engine
                    .filter(buffer, angle, gain)
                    .map_err(SessionError::FilterEngine)?;
            }

            // Carry the tail over as the head of the next chunk.
            let tail = buffer.len() - overlap;
            buffer.copy_within(tail.., 0);

            match streaming.status() {
                BufferStatus::ErrorQuit | BufferStatus::Quit => {
                    return Err(SessionError::Buffering {
                        source_name: source.name().to_string(),
                    })
                }
                BufferStatus::EndOfStream => {}
                BufferStatus::Running => all_ended = false,
            }
            streaming.request_next_chunk().map_err(buffering_error)?;
        }

        self.engine
            .end_block(self.crossfade, &mut self.output)
            .map_err(SessionError::FilterEngine)?;
        self.crossfade = true;
        Ok(all_ended)
    }

    fn rewind_sources(&mut self) -> Result<(), SessionError> {
        debug!("Rewinding.");
        for (source, streaming) in self.scene.sources().iter().zip(self.sources.iter_mut()) {
            streaming
                .rewind()
                .and_then(|()| streaming.request_next_chunk())
                .map_err(|e| {
                    error!(source = source.name(), err = %e, "Rewind failed.");
                    SessionError::Buffering {
                        source_name: source.name().to_string(),
                    }
                })?;
        }
        // Rewound audio must not blend with what played before.
        self.crossfade = false;
        Ok(())
    }

    /// Reports the first failure to the owner and asks the loop to quit.
    fn fail(&mut self, e: SessionError) {
        if self.failed {
            warn!(err = %e, "Further session failure.");
        } else {
            self.failed = true;
            error!(err = %e, "Session failed.");
            let _ = self.errors_tx.try_send(e);
        }
        self.transport.quit();
    }
}
