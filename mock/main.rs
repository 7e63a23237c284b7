#![forbid(unsafe_code)]

//! `usi-bridge-mock-engine`: scripted USI engine for tests.
//!
//! Speaks just enough USI for the bridge: the handshake, `position`, `go`
//! with a canned `bestmove`, and `quit`. Failure modes (silence, crashes,
//! missing replies, slow replies) are selected with flags.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "usi-bridge-mock-engine",
    about = "Scripted USI engine for usi-bridge tests",
    version,
    long_about = None
)]
struct Cli {
    /// Name reported during the handshake.
    #[arg(long, default_value = "MockEngine")]
    name: String,

    /// Author reported during the handshake.
    #[arg(long, default_value = "usi-bridge")]
    author: String,

    /// Advertise the name through an `Engine_Name` option instead of `id name`.
    #[arg(long)]
    option_name: bool,

    /// Never answer `usi` with `usiok`.
    #[arg(long)]
    no_usiok: bool,

    /// Never print anything.
    #[arg(long)]
    silent: bool,

    /// Exit with this code right after starting.
    #[arg(long, value_name = "CODE")]
    exit_on_start: Option<i32>,

    /// Exit with this code on `usi`, before printing anything.
    #[arg(long, value_name = "CODE")]
    exit_on_usi: Option<i32>,

    /// Exit with this code on `isready` instead of printing `readyok`.
    #[arg(long, value_name = "CODE")]
    exit_before_readyok: Option<i32>,

    /// Exit with this code on `position`.
    #[arg(long, value_name = "CODE")]
    crash_on_position: Option<i32>,

    /// Exit with this code on `go`.
    #[arg(long, value_name = "CODE")]
    crash_on_go: Option<i32>,

    /// Delay before any scripted exit other than `--exit-on-start`.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    exit_delay_ms: u64,

    /// Never answer `go`.
    #[arg(long)]
    no_bestmove: bool,

    /// Delay before each `bestmove`.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    bestmove_delay_ms: u64,

    /// Moves returned by successive `go` commands, cycled.
    #[arg(long, value_delimiter = ',', default_value = "7g7f")]
    moves: Vec<String>,

    /// Ponder move appended to every `bestmove`.
    #[arg(long)]
    ponder: Option<String>,

    /// Append every received line to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();
    if let Some(code) = cli.exit_on_start {
        process::exit(code);
    }

    let mut log = cli
        .log_file
        .as_ref()
        .map(|path| OpenOptions::new().create(true).append(true).open(path))
        .transpose()?;

    let mut go_count = 0usize;
    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        record(log.as_mut(), line)?;

        let command = line.split_whitespace().next().unwrap_or_default();
        match command {
            "usi" => {
                if let Some(code) = cli.exit_on_usi {
                    exit_after_delay(&cli, code);
                }
                handshake(&cli);
            }
            "isready" => {
                if let Some(code) = cli.exit_before_readyok {
                    exit_after_delay(&cli, code);
                }
                say(&cli, "readyok");
            }
            "position" => {
                if let Some(code) = cli.crash_on_position {
                    exit_after_delay(&cli, code);
                }
            }
            "go" => {
                if let Some(code) = cli.crash_on_go {
                    exit_after_delay(&cli, code);
                }
                if !cli.no_bestmove && !cli.moves.is_empty() {
                    answer_go(&cli, &cli.moves[go_count % cli.moves.len()]);
                }
                go_count += 1;
            }
            "quit" => process::exit(0),
            _ => {}
        }
    }
    Ok(())
}

fn exit_after_delay(cli: &Cli, code: i32) -> ! {
    thread::sleep(Duration::from_millis(cli.exit_delay_ms));
    process::exit(code);
}

fn handshake(cli: &Cli) {
    if cli.option_name {
        say(
            cli,
            &format!("option name Engine_Name type string default {}", cli.name),
        );
    } else {
        say(cli, &format!("id name {}", cli.name));
    }
    say(cli, &format!("id author {}", cli.author));
    say(cli, "option name USI_Hash type spin default 256 min 1 max 1024");
    if !cli.no_usiok {
        say(cli, "usiok");
    }
}

fn answer_go(cli: &Cli, best: &str) {
    let silent = cli.silent;
    let delay = Duration::from_millis(cli.bestmove_delay_ms);
    let line = match &cli.ponder {
        Some(ponder) => format!("bestmove {best} ponder {ponder}"),
        None => format!("bestmove {best}"),
    };
    let info = format!("info depth 1 score cp 0 pv {best}");
    thread::spawn(move || {
        thread::sleep(delay);
        if !silent {
            emit(&info);
            emit(&line);
        }
    });
}

fn say(cli: &Cli, line: &str) {
    if !cli.silent {
        emit(line);
    }
}

fn emit(line: &str) {
    let mut out = io::stdout().lock();
    // A closed stdout means the bridge is gone; nothing left to do.
    if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
        process::exit(0);
    }
}

fn record(log: Option<&mut File>, line: &str) -> io::Result<()> {
    if let Some(file) = log {
        writeln!(file, "{line}")?;
        file.flush()?;
    }
    Ok(())
}
