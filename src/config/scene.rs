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
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::error::ConfigError;
use crate::scene;

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
const DEFAULT_SOURCE_VOLUME: f32 = 100.0;
const DEFAULT_SOURCE_LEVEL: f32 = 0.0;

/// A YAML representation of a scene.
#[derive(Deserialize, Clone, Debug)]
pub struct Scene {
    /// Sample rate every source file must have (default: 44100)
    sample_rate: Option<u32>,

    /// Bits per sample every source file must have (default: 16)
    bits_per_sample: Option<u16>,

    /// Scene volume, 0 to 100 (default: 50)
    volume: Option<f32>,

    listener: Option<Listener>,

    /// The sources, in render order.
    #[serde(default)]
    sources: Vec<Source>,

    /// Directory that source files are relative to. Set on load.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Listener {
    /// Initial head orientation in degrees.
    azimuth: Option<f32>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Position {
    x: f32,
    y: f32,
}

/// A YAML representation of a sound source.
#[derive(Deserialize, Clone, Debug)]
pub struct Source {
    name: String,

    /// A mono WAV file, relative to the scene file.
    file: String,

    position: Option<Position>,

    azimuth: Option<f32>,

    muted: Option<bool>,

    /// Presentation-only metadata.
    volume: Option<f32>,
    level: Option<f32>,

    /// Whether the source loops at the end of its file (default: true)
    #[serde(rename = "loop")]
    looping: Option<bool>,
}

impl Scene {
    /// Deserializes a scene file. Source paths resolve against the file's directory.
    pub fn deserialize(path: &Path) -> Result<Scene, ConfigError> {
        let mut scene = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Scene>()?;
        scene.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(scene)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE)
    }

    pub fn volume(&self) -> f32 {
        self.volume.unwrap_or(scene::DEFAULT_VOLUME)
    }

    /// Validates the scene and builds the runtime model.
    pub fn to_scene(&self) -> Result<scene::Scene, ConfigError> {
        if self.sample_rate() == 0 {
            return Err(ConfigError::InvalidScene(
                "sample rate must be greater than 0".into(),
            ));
        }
        let volume = self.volume();
        if !(0.0..=scene::MAX_VOLUME).contains(&volume) {
            return Err(ConfigError::InvalidScene(format!(
                "volume {volume} is outside 0-100"
            )));
        }

        let mut names = HashSet::new();
        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::InvalidScene(format!(
                    "duplicate source name {}",
                    source.name
                )));
            }
            sources.push(source.to_source(&self.base_dir));
        }

        let azimuth = self
            .listener
            .as_ref()
            .and_then(|listener| listener.azimuth)
            .unwrap_or(0.0);

        Ok(scene::Scene::new(
            self.sample_rate(),
            self.bits_per_sample(),
            volume,
            scene::Listener::new(azimuth),
            sources,
        ))
    }
}

impl Source {
    fn to_source(&self, base_dir: &Path) -> scene::Source {
        let (x, y) = self
            .position
            .as_ref()
            .map(|position| (position.x, position.y))
            .unwrap_or((0.0, 0.0));
        scene::Source::new(&self.name, &base_dir.join(&self.file))
            .with_position(x, y)
            .with_azimuth(self.azimuth.unwrap_or(0.0))
            .with_muted(self.muted.unwrap_or(false))
            .with_meta(
                self.volume.unwrap_or(DEFAULT_SOURCE_VOLUME),
                self.level.unwrap_or(DEFAULT_SOURCE_LEVEL),
            )
            .with_loop(self.looping.unwrap_or(true))
    }
}
