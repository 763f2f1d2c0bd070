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
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, Sender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, span, warn, Instrument, Level};

use crate::render::{RenderEngine, SessionError};
use crate::scene::{Observer, Scene, TransportState};

pub mod keyboard;

/// How often the status task checks the scene for changes.
const STATUS_INTERVAL: Duration = Duration::from_millis(100);

/// Controller events that will trigger behavior in the render session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Starts or resumes playback.
    Play,

    /// Fades out and pauses at the next block boundary.
    Pause,

    /// Restarts every source from the beginning.
    Rewind,

    /// Ends the session.
    Quit,

    /// Sets the scene volume, 0 to 100.
    Volume(f32),

    /// Turns the listener to face the given azimuth in degrees.
    Turn(f32),

    /// Mutes the source at the given index.
    Mute(usize),

    /// Unmutes the source at the given index.
    Unmute(usize),

    /// Moves the source at the given index.
    Move { source: usize, x: f32, y: f32 },
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// A change the UI should show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusChange {
    Transport(TransportState),
    Volume(f32),
}

/// Reads and clears the UI change flags of the scene.
pub fn take_status_changes(scene: &Scene) -> Vec<StatusChange> {
    let mut changes = Vec::new();
    if scene.take_transport_changed(Observer::Ui) {
        changes.push(StatusChange::Transport(scene.transport_state()));
    }
    if scene.take_volume_changed(Observer::Ui) {
        changes.push(StatusChange::Volume(scene.volume()));
    }
    changes
}

/// Drives a render session from a driver's events until quit or a session failure.
pub struct Controller {
    handle: JoinHandle<Result<(), SessionError>>,
}

impl Controller {
    /// Takes ownership of the session, which is shut down when the controller finishes.
    pub fn new(engine: RenderEngine, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(Controller::trigger_events(engine, driver)),
        }
    }

    /// Join will block until the controller finishes. The inner result is the session
    /// failure that ended it, if any.
    pub async fn join(&mut self) -> Result<Result<(), SessionError>, JoinError> {
        (&mut self.handle).await
    }

    async fn trigger_events(
        mut engine: RenderEngine,
        driver: Arc<dyn Driver>,
    ) -> Result<(), SessionError> {
        let span = span!(Level::INFO, "controller");

        async move {
            let (events_tx, mut events_rx) = mpsc::channel(1);
            let driver_handle = driver.monitor_events(events_tx);

            // Resolves with the session's failure, or None once the render thread exits.
            let errors_rx = engine.errors().clone();
            let mut failure = tokio::task::spawn_blocking(move || errors_rx.recv().ok());
            let status = tokio::spawn(report_status(engine.scene().clone()));

            info!(
                sources = engine.scene().sources().len(),
                "Controller started."
            );

            let result = loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(Event::Quit) => {
                            info!("Quit requested.");
                            break Ok(());
                        }
                        Some(event) => {
                            info!(event = format!("{:?}", event), "Received event.");
                            apply(&engine, event);
                        }
                        None => {
                            info!("Event driver closed.");
                            break Ok(());
                        }
                    },
                    failed = &mut failure => match failed {
                        Ok(Some(e)) => {
                            error!(err = %e, "Session failed, shutting down.");
                            break Err(e);
                        }
                        Ok(None) => {
                            info!("Session ended.");
                            break Ok(());
                        }
                        Err(e) => {
                            error!(err = %e, "Error watching the session.");
                            break Ok(());
                        }
                    },
                }
            };

            // Joining the render thread blocks.
            if let Err(e) = tokio::task::spawn_blocking(move || engine.shutdown()).await {
                error!(err = %e, "Error shutting down the session.");
            }
            status.abort();

            // A driver blocked on input can't be interrupted, so it's only reaped when done.
            if driver_handle.is_finished() {
                match driver_handle.await {
                    Ok(Err(e)) => error!(err = %e, "Event driver failed."),
                    Err(e) => error!(err = %e, "Error waiting for event driver to stop."),
                    Ok(Ok(())) => {}
                }
            }
            info!("Controller closing.");
            result
        }
        .instrument(span)
        .await
    }
}

fn apply(engine: &RenderEngine, event: Event) {
    let scene = engine.scene();
    match event {
        Event::Play => engine.play(),
        Event::Pause => engine.pause(),
        Event::Rewind => engine.rewind(),
        Event::Quit => engine.quit(),
        Event::Volume(volume) => scene.set_volume(volume),
        Event::Turn(azimuth) => scene.listener().set_azimuth(azimuth),
        Event::Mute(index) => set_muted(scene, index, true),
        Event::Unmute(index) => set_muted(scene, index, false),
        Event::Move { source, x, y } => match scene.source(source) {
            Some(found) => found.set_position(x, y),
            None => warn!(index = source, "No such source."),
        },
    }
}

fn set_muted(scene: &Scene, index: usize, muted: bool) {
    match scene.source(index) {
        Some(source) => source.set_muted(muted),
        None => warn!(index, "No such source."),
    }
}

async fn report_status(scene: Arc<Scene>) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    loop {
        interval.tick().await;
        for change in take_status_changes(&scene) {
            match change {
                StatusChange::Transport(state) => info!(transport = %state, "Transport changed."),
                StatusChange::Volume(volume) => info!(volume, "Volume changed."),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::mpsc::{self, Sender};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::audio::mock::{self, SinkCall, SinkProbe};
    use crate::scene::{Listener, Source};
    use crate::testutil::{
        eventually_async, pcm_source, ramp, tiny_output_settings, tiny_sizing, RecordingEngine,
    };

    /// A driver that forwards whatever the test sends it.
    struct TestDriver {
        events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    }

    impl TestDriver {
        fn new() -> (Arc<TestDriver>, Sender<Event>) {
            let (events_tx, events_rx) = mpsc::channel(8);
            let driver = Arc::new(TestDriver {
                events_rx: Mutex::new(Some(events_rx)),
            });
            (driver, events_tx)
        }
    }

    impl Driver for TestDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let events_rx = self.events_rx.lock().take();
            tokio::spawn(async move {
                let Some(mut events_rx) = events_rx else {
                    return Ok(());
                };
                while let Some(event) = events_rx.recv().await {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(())
            })
        }
    }

    fn scene() -> Scene {
        Scene::new(
            44100,
            16,
            50.0,
            Listener::new(0.0),
            vec![
                Source::new("a", Path::new("a.wav")).with_position(0.0, -1.0),
                Source::new("b", Path::new("b.wav")).with_position(0.0, 1.0),
            ],
        )
    }

    /// Starts a session that writes a block every millisecond.
    fn start(engine: RecordingEngine) -> (RenderEngine, SinkProbe) {
        let sink = mock::Sink::new("mock", tiny_output_settings(&tiny_sizing()))
            .paced(Duration::from_millis(1));
        let probe = sink.probe();
        let sources = vec![
            pcm_source("a", &ramp(800), true),
            pcm_source("b", &ramp(800), true),
        ];
        let engine = RenderEngine::start(
            Arc::new(scene()),
            sources,
            Box::new(engine),
            tiny_sizing(),
            Box::new(sink),
        )
        .unwrap();
        (engine, probe)
    }

    fn recording_engine() -> RecordingEngine {
        RecordingEngine::new(tiny_sizing().overlap_samples())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_reach_the_session() {
        let (engine, probe) = start(recording_engine());
        let scene = engine.scene().clone();
        let (driver, events_tx) = TestDriver::new();
        let mut controller = Controller::new(engine, driver);

        events_tx.send(Event::Volume(80.0)).await.unwrap();
        events_tx.send(Event::Turn(45.0)).await.unwrap();
        events_tx.send(Event::Mute(1)).await.unwrap();
        // Out of range indexes are ignored.
        events_tx.send(Event::Unmute(7)).await.unwrap();
        events_tx
            .send(Event::Move {
                source: 0,
                x: 2.0,
                y: 3.0,
            })
            .await
            .unwrap();
        eventually_async(
            || async { scene.sources()[0].position() == (2.0, 3.0) },
            "Source never moved",
        )
        .await;
        assert_eq!(80.0, scene.volume());
        assert_eq!(45.0, scene.listener().azimuth());
        assert!(scene.sources()[1].is_muted());
        assert!(!scene.sources()[0].is_muted());

        eventually_async(
            || async { scene.transport_state() == TransportState::Playing },
            "Session never started",
        )
        .await;
        events_tx.send(Event::Pause).await.unwrap();
        eventually_async(
            || async { scene.transport_state() == TransportState::Paused },
            "Session never paused",
        )
        .await;
        events_tx.send(Event::Play).await.unwrap();
        eventually_async(
            || async { scene.transport_state() == TransportState::Playing },
            "Session never resumed",
        )
        .await;

        events_tx.send(Event::Quit).await.unwrap();
        assert!(controller.join().await.unwrap().is_ok());
        assert_eq!(
            vec![
                SinkCall::Start,
                SinkCall::Play,
                SinkCall::FlushAndPause,
                SinkCall::Play,
                SinkCall::FlushAndPause,
                SinkCall::Pause,
                SinkCall::Shutdown
            ],
            probe.calls()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_failure_ends_controller() {
        let (engine, probe) = start(recording_engine().fail_at_block(5));
        let (driver, _events_tx) = TestDriver::new();
        let mut controller = Controller::new(engine, driver);

        assert!(matches!(
            controller.join().await.unwrap(),
            Err(SessionError::FilterEngine(_))
        ));
        assert_eq!(
            &[SinkCall::Pause, SinkCall::Shutdown],
            &probe.calls()[probe.calls().len() - 2..]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_driver_ends_controller() {
        let (engine, probe) = start(recording_engine());
        let (driver, events_tx) = TestDriver::new();
        let mut controller = Controller::new(engine, driver);

        drop(events_tx);
        assert!(controller.join().await.unwrap().is_ok());
        assert_eq!(Some(&SinkCall::Shutdown), probe.calls().last());
    }

    #[test]
    fn test_status_changes_are_read_once() {
        let scene = scene();
        // Everything reads as changed the first time.
        assert_eq!(
            vec![
                StatusChange::Transport(TransportState::Paused),
                StatusChange::Volume(50.0)
            ],
            take_status_changes(&scene)
        );
        assert!(take_status_changes(&scene).is_empty());

        scene.set_volume(20.0);
        scene.set_transport_state(TransportState::Playing);
        assert_eq!(
            vec![
                StatusChange::Transport(TransportState::Playing),
                StatusChange::Volume(20.0)
            ],
            take_status_changes(&scene)
        );

        // The renderer still sees the change the UI already read.
        assert!(scene.take_volume_changed(Observer::Renderer));
    }
}
