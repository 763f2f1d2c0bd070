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
mod audio;
mod engine;
mod polling;
mod session;

pub use audio::write_wav;
pub use engine::{EngineLog, RecordingEngine, ENGINE_OUTPUT_LEVEL};
pub use polling::{eventually, eventually_async};
pub use session::{pcm_source, pcm_source_over, ramp, tiny_output_settings, tiny_sizing};
