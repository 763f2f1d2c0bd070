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

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const PLAY: &str = "play";
const PAUSE: &str = "pause";
const REWIND: &str = "rewind";
const QUIT: &str = "quit";
const VOLUME: &str = "volume";
const TURN: &str = "turn";
const MUTE: &str = "mute";
const UNMUTE: &str = "unmute";
const MOVE: &str = "move";

/// A controller that controls the session with line commands on the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads and handles one command. Returns false once there's nothing more to read.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {} <0-100>, {} <degrees>, {} <n>, {} <n>, {} <n> <x> <y>): ",
            PLAY, PAUSE, REWIND, QUIT, VOLUME, TURN, MUTE, UNMUTE, MOVE,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            // End of input ends the session.
            send(events_tx, Event::Quit)?;
            return Ok(false);
        }

        match parse_command(&input) {
            Some(event) => {
                let quit = event == Event::Quit;
                send(events_tx, event)?;
                Ok(!quit)
            }
            None => {
                warn!(input = input.trim(), "Unrecognized input");
                Ok(true)
            }
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

fn send(events_tx: &Sender<Event>, event: Event) -> Result<(), io::Error> {
    events_tx
        .blocking_send(event)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Parses a command line. Commands are case insensitive; arguments are whitespace separated.
fn parse_command(input: &str) -> Option<Event> {
    let input = input.trim().to_lowercase();
    let mut words = input.split_whitespace();
    let command = words.next()?;
    let args: Vec<&str> = words.collect();

    let event = match (command, args.as_slice()) {
        (PLAY, []) => Event::Play,
        (PAUSE, []) => Event::Pause,
        (REWIND, []) => Event::Rewind,
        (QUIT, []) => Event::Quit,
        (VOLUME, [volume]) => Event::Volume(volume.parse().ok()?),
        (TURN, [degrees]) => Event::Turn(degrees.parse().ok()?),
        (MUTE, [index]) => Event::Mute(index.parse().ok()?),
        (UNMUTE, [index]) => Event::Unmute(index.parse().ok()?),
        (MOVE, [index, x, y]) => Event::Move {
            source: index.parse().ok()?,
            x: x.parse().ok()?,
            y: y.parse().ok()?,
        },
        _ => return None,
    };
    Some(event)
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            info!("Keyboard driver stopped.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader};

    use tokio::sync::mpsc;

    use super::*;

    /// Feeds one line to the driver and returns whether it continues and what it sent.
    fn get_event(input: &str) -> Result<(bool, Option<Event>), io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Event>(1);

        let reader = BufReader::new(input.as_bytes());
        let mut prompt: Vec<u8> = Vec::new();
        let more = Driver::monitor_io(&sender, reader, &mut prompt)?;
        assert!(String::from_utf8_lossy(&prompt).starts_with("Command ("));

        // Force the sender to close.
        drop(sender);
        Ok((more, receiver.blocking_recv()))
    }

    #[test]
    fn test_keyboard_events() -> Result<(), io::Error> {
        assert_eq!((true, Some(Event::Play)), get_event("play\n")?);
        assert_eq!((true, Some(Event::Pause)), get_event("PAUSE\n")?);
        assert_eq!((true, Some(Event::Rewind)), get_event("  rewind  \n")?);
        assert_eq!((true, Some(Event::Volume(75.0))), get_event("volume 75\n")?);
        assert_eq!((true, Some(Event::Turn(-90.0))), get_event("turn -90\n")?);
        assert_eq!((true, Some(Event::Mute(2))), get_event("mute 2\n")?);
        assert_eq!((true, Some(Event::Unmute(0))), get_event("unmute 0\n")?);
        assert_eq!(
            (
                true,
                Some(Event::Move {
                    source: 1,
                    x: 0.5,
                    y: -2.0
                })
            ),
            get_event("move 1 0.5 -2\n")?
        );
        Ok(())
    }

    #[test]
    fn test_quit_and_end_of_input_stop() -> Result<(), io::Error> {
        assert_eq!((false, Some(Event::Quit)), get_event("quit\n")?);
        assert_eq!((false, Some(Event::Quit)), get_event("")?);
        Ok(())
    }

    #[test]
    fn test_bad_commands_are_ignored() -> Result<(), io::Error> {
        assert_eq!((true, None), get_event("unrecognized\n")?);
        assert_eq!((true, None), get_event("volume\n")?);
        assert_eq!((true, None), get_event("volume loud\n")?);
        assert_eq!((true, None), get_event("mute -1\n")?);
        assert_eq!((true, None), get_event("move 1 2\n")?);
        assert_eq!((true, None), get_event("play now\n")?);
        assert_eq!((true, None), get_event("\n")?);
        Ok(())
    }
}
