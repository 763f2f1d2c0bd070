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
// Per-source gain and HRIR angle. The listener sits at the origin facing -y.
//

use crate::hrir::HRIR_ANGLES;

/// Gain of a source at distance 1 with the scene at full volume.
pub const BASE_GAIN: f32 = 2.0;

/// Distances below this are treated as this, so gain stays finite near the listener.
pub const MIN_DISTANCE: f32 = 0.2;

/// Gain for a source at (x, y). `volume_fraction` is the scene volume over 100.
pub fn source_gain(volume_fraction: f32, x: f32, y: f32) -> f32 {
    let distance = x.hypot(y).max(MIN_DISTANCE);
    BASE_GAIN * volume_fraction / distance.sqrt()
}

/// HRIR index for a source at (x, y) heard by a listener turned `listener_azimuth` degrees.
pub fn hrir_angle(x: f32, y: f32, listener_azimuth: f32) -> u16 {
    let bearing = -x.atan2(-y).to_degrees();
    let angle = (bearing + listener_azimuth).round();
    if !angle.is_finite() {
        return 0;
    }
    (angle as i64).rem_euclid(HRIR_ANGLES as i64) as u16
}
