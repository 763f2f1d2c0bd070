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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;

/// The configuration for the player.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// The audio output configuration.
    audio: Audio,

    /// The HRIR file, relative to the player config.
    hrirs: String,

    #[serde(skip)]
    base_dir: PathBuf,
}

impl Player {
    /// Parse a player config from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        let mut player = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Player>()?;
        player.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(player)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Resolved path to the HRIR file.
    pub fn hrirs(&self) -> PathBuf {
        self.base_dir.join(&self.hrirs)
    }
}
