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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use binaural_scene::audio::{self, BufferSizing};
use binaural_scene::config::{Player, Scene};
use binaural_scene::controller::{keyboard, Controller};
use binaural_scene::hrir::Hrirs;
use binaural_scene::render::{self, RenderEngine};
use binaural_scene::scene;
use clap::{crate_version, Parser, Subcommand};
use tracing::error;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time binaural scene renderer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a scene, controlled from the keyboard.
    Play {
        /// The path to the player config.
        player_path: PathBuf,
        /// The path to the scene.
        scene_path: PathBuf,
    },
    /// Loads a player config and scene and prints what a session would use, without
    /// opening the audio device.
    Verify {
        /// The path to the player config.
        player_path: PathBuf,
        /// The path to the scene.
        scene_path: PathBuf,
    },
}

/// Everything a session needs before a sink is opened.
struct Loaded {
    player: Player,
    hrirs: Hrirs,
    scene: scene::Scene,
    sizing: BufferSizing,
}

fn load(player_path: &Path, scene_path: &Path) -> Result<Loaded, Box<dyn Error>> {
    let player = Player::deserialize(player_path)?;
    let hrirs = Hrirs::load(&player.hrirs())?;
    let scene = Scene::deserialize(scene_path)?.to_scene()?;
    let sizing = player
        .audio()
        .buffer_sizing(hrirs.filter_len(), scene.sample_rate())?;
    Ok(Loaded {
        player,
        hrirs,
        scene,
        sizing,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            player_path,
            scene_path,
        } => {
            let loaded = load(&player_path, &scene_path)?;
            let settings = loaded
                .player
                .audio()
                .output_settings(&loaded.sizing, loaded.scene.sample_rate());
            let sink = audio::get_sink(loaded.player.audio().device(), settings)?;
            let engine = RenderEngine::setup(
                Arc::new(loaded.scene),
                &loaded.hrirs,
                loaded.sizing,
                sink,
            )?;

            let mut controller = Controller::new(engine, Arc::new(keyboard::Driver::new()));
            if let Err(e) = controller.join().await? {
                error!(err = %e, "Session failed.");
                // The keyboard driver may still be blocked on stdin, which would hold up
                // the runtime shutting down.
                std::process::exit(1);
            }
        }
        Commands::Verify {
            player_path,
            scene_path,
        } => {
            let loaded = load(&player_path, &scene_path)?;
            let infos = render::verify(&loaded.scene, &loaded.hrirs, &loaded.sizing)?;

            println!("Device: {}", loaded.player.audio().device());
            println!(
                "HRIRs: {} ({} taps)",
                loaded.player.hrirs().display(),
                loaded.hrirs.filter_len()
            );
            println!("Buffer sizing: {}", loaded.sizing);
            println!(
                "Scene: {} Hz, {} bit, volume {}",
                loaded.scene.sample_rate(),
                loaded.scene.bits_per_sample(),
                loaded.scene.volume()
            );
            println!("Sources (count: {}):", infos.len());
            for (source, info) in loaded.scene.sources().iter().zip(infos) {
                println!("- {}: {}", source, info);
            }
        }
    }

    Ok(())
}
