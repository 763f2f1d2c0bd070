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
// The scene shared between the control side and the render thread.
//
// The source list never changes once a scene is built. Per-source scalars
// (mute, position) and the listener azimuth are single atomics written by the
// control side and read once per block by the renderer without further
// synchronization, so the renderer may use a value one block stale.
//
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use tracing::debug;

/// Display names longer than this are truncated.
const DISPLAY_NAME_MAX_CHARS: usize = 14;

/// Levels are in dB; this range maps onto 0..=1 for meters.
const LEVEL_FLOOR_DB: f32 = -60.0;
const LEVEL_RANGE_DB: f32 = 72.0;

pub const MAX_VOLUME: f32 = 100.0;
pub const DEFAULT_VOLUME: f32 = 50.0;

/// Transport state as seen by the scene's readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Playing,
    Paused,
}

impl TransportState {
    fn from_u8(value: u8) -> TransportState {
        if value == TransportState::Playing as u8 {
            TransportState::Playing
        } else {
            TransportState::Paused
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
        }
    }
}

/// A reader of the scene's change flags. Each has its own flags, so one reader clearing
/// a flag never hides the change from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observer {
    Renderer,
    Ui,
}

const OBSERVERS: usize = 2;

impl Observer {
    fn index(self) -> usize {
        match self {
            Observer::Renderer => 0,
            Observer::Ui => 1,
        }
    }
}

#[derive(Debug)]
struct ChangeFlags {
    volume: AtomicBool,
    transport: AtomicBool,
}

impl ChangeFlags {
    fn new() -> ChangeFlags {
        // Start set, so every reader picks up the initial values.
        ChangeFlags {
            volume: AtomicBool::new(true),
            transport: AtomicBool::new(true),
        }
    }
}

/// The listener, fixed at the origin. Only the head orientation changes.
#[derive(Debug)]
pub struct Listener {
    azimuth: AtomicU32,
}

impl Listener {
    pub fn new(azimuth: f32) -> Listener {
        Listener {
            azimuth: AtomicU32::new(azimuth.to_bits()),
        }
    }

    /// Head orientation in degrees.
    pub fn azimuth(&self) -> f32 {
        f32::from_bits(self.azimuth.load(Ordering::Relaxed))
    }

    /// Updates the head orientation. Called by head tracking at any time.
    pub fn set_azimuth(&self, azimuth: f32) {
        self.azimuth.store(azimuth.to_bits(), Ordering::Relaxed);
    }
}

/// A sound source in the scene.
#[derive(Debug)]
pub struct Source {
    name: String,
    display_name: String,
    path: PathBuf,
    /// x and y as f32 bits, packed so both are always read together.
    position: AtomicU64,
    azimuth: f32,
    muted: AtomicBool,
    volume: f32,
    level: f32,
    looping: bool,
}

impl Source {
    /// A looping, unmuted source at the origin.
    pub fn new(name: &str, path: &Path) -> Source {
        Source {
            name: name.to_string(),
            display_name: display_name(name),
            path: path.to_path_buf(),
            position: AtomicU64::new(pack_position(0.0, 0.0)),
            azimuth: 0.0,
            muted: AtomicBool::new(false),
            volume: MAX_VOLUME,
            level: 0.0,
            looping: true,
        }
    }

    pub fn with_position(self, x: f32, y: f32) -> Source {
        self.set_position(x, y);
        self
    }

    pub fn with_muted(self, muted: bool) -> Source {
        self.set_muted(muted);
        self
    }

    pub fn with_loop(mut self, looping: bool) -> Source {
        self.looping = looping;
        self
    }

    pub fn with_azimuth(mut self, azimuth: f32) -> Source {
        self.azimuth = azimuth;
        self
    }

    /// Presentation-only volume and level (dB). Neither affects rendering.
    pub fn with_meta(mut self, volume: f32, level: f32) -> Source {
        self.volume = volume;
        self.level = level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name, shortened for display.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position in scene units, listener at the origin.
    pub fn position(&self) -> (f32, f32) {
        unpack_position(self.position.load(Ordering::Relaxed))
    }

    pub fn set_position(&self, x: f32, y: f32) {
        self.position
            .store(pack_position(x, y), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Reserved. Sound sources are omnidirectional.
    pub fn azimuth(&self) -> f32 {
        self.azimuth
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// The level mapped from -60..12 dB onto 0..=1.
    pub fn normalized_level(&self) -> f32 {
        ((self.level - LEVEL_FLOOR_DB) / LEVEL_RANGE_DB).clamp(0.0, 1.0)
    }

    pub fn looping(&self) -> bool {
        self.looping
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.position();
        write!(f, "{} at ({:.2}, {:.2})", self.display_name, x, y)?;
        if self.is_muted() {
            write!(f, " [muted]")?;
        }
        Ok(())
    }
}

fn display_name(name: &str) -> String {
    if name.chars().count() > DISPLAY_NAME_MAX_CHARS {
        let truncated: String = name.chars().take(DISPLAY_NAME_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        name.to_string()
    }
}

fn pack_position(x: f32, y: f32) -> u64 {
    (u64::from(x.to_bits()) << 32) | u64::from(y.to_bits())
}

fn unpack_position(packed: u64) -> (f32, f32) {
    (
        f32::from_bits((packed >> 32) as u32),
        f32::from_bits(packed as u32),
    )
}

/// A loaded scene.
#[derive(Debug)]
pub struct Scene {
    sample_rate: u32,
    bits_per_sample: u16,
    sources: Vec<Source>,
    listener: Listener,
    volume: AtomicU32,
    transport: AtomicU8,
    flags: [ChangeFlags; OBSERVERS],
}

impl Scene {
    pub fn new(
        sample_rate: u32,
        bits_per_sample: u16,
        volume: f32,
        listener: Listener,
        sources: Vec<Source>,
    ) -> Scene {
        Scene {
            sample_rate,
            bits_per_sample,
            sources,
            listener,
            volume: AtomicU32::new(clamp_volume(volume).to_bits()),
            transport: AtomicU8::new(TransportState::Paused as u8),
            flags: [ChangeFlags::new(), ChangeFlags::new()],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Scene volume, 0 to 100.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Sets the scene volume, clamped to 0..=100, and flags the change for every observer.
    pub fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        for flags in &self.flags {
            flags.volume.store(true, Ordering::Release);
        }
        debug!(volume, "Scene volume changed.");
    }

    pub fn transport_state(&self) -> TransportState {
        TransportState::from_u8(self.transport.load(Ordering::Acquire))
    }

    /// Publishes a transport state. Observers are only flagged on an actual change.
    pub fn set_transport_state(&self, state: TransportState) {
        let previous = self.transport.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            for flags in &self.flags {
                flags.transport.store(true, Ordering::Release);
            }
        }
    }

    /// Reads and clears the volume flag for the given observer.
    pub fn take_volume_changed(&self, observer: Observer) -> bool {
        self.flags[observer.index()]
            .volume
            .swap(false, Ordering::AcqRel)
    }

    /// Reads and clears the transport flag for the given observer.
    pub fn take_transport_changed(&self, observer: Observer) -> bool {
        self.flags[observer.index()]
            .transport
            .swap(false, Ordering::AcqRel)
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}
