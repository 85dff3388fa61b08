//! Fake `zpool` stand-in for integration test usage

use anyhow::Context as _;
use clap::Parser as _;
use std::path::{Path, PathBuf};

const FAKE_INPUT: &str = include_str!("input-integration.txt");
const FAKE_LAST_ROW: &str = "test0       94.5K  79.5M      0      0    152    539\n";
const FAKE_NEW_ROW: &str = "scratch       10M    90M      0      0      0      0\n";

#[derive(clap::Parser)]
struct Args {
    arg0: String,

    #[clap(env)]
    #[arg(value_enum)]
    #[clap(default_value_t)]
    fake_zpool_mode: Mode,

    /// Invocation counter, for modes that change output between polls
    #[clap(long, env)]
    fake_zpool_counter_file: Option<PathBuf>,
}
#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum Mode {
    #[default]
    Normal,
    NoPools,
    UnknownUnit,
    #[value(name = "exit-code-1")]
    ExitCode1,
    /// Allocated capacity of "tank" grows by 1M per invocation
    Changing,
    /// Unknown unit on every invocation after the first
    FailAfterFirst,
    /// Same as `Changing`, with an extra pool on every invocation after the first
    NewPoolAfterFirst,
}

fn main() -> anyhow::Result<()> {
    let Args {
        arg0,
        fake_zpool_mode,
        fake_zpool_counter_file,
    } = Args::parse();

    if arg0 != "iostat" {
        eprintln!("fake-zpool does not recognize argument {arg0:?}");
        std::process::exit(2);
    }

    let count = match &fake_zpool_counter_file {
        Some(counter_file) => next_count(counter_file)?,
        None => 0,
    };

    // input for the parser = output by this `zpool` stand-in
    match fake_zpool_mode {
        Mode::Normal => print!("{FAKE_INPUT}"),
        Mode::NoPools => {}
        Mode::UnknownUnit => print!("{}", FAKE_INPUT.replacen("792M", "792X", 1)),
        Mode::ExitCode1 => {
            println!("exit1 stdout contents");
            eprintln!("exit1 stderr contents");
            std::process::exit(1);
        }
        Mode::Changing => print!("{}", changing(count)),
        Mode::FailAfterFirst => {
            if count == 0 {
                print!("{FAKE_INPUT}");
            } else {
                print!("{}", FAKE_INPUT.replacen("792M", "792X", 1));
            }
        }
        Mode::NewPoolAfterFirst => {
            let output = changing(count);
            if count == 0 {
                print!("{output}");
            } else {
                let with_new = format!("{FAKE_LAST_ROW}{FAKE_NEW_ROW}");
                print!("{}", output.replacen(FAKE_LAST_ROW, &with_new, 1));
            }
        }
    }
    Ok(())
}

/// Allocated capacity of "tank" grows by 1M per invocation
fn changing(count: u32) -> String {
    let alloc = format!("{}M", 200 + count);
    FAKE_INPUT.replacen("200M", &alloc, 1)
}

/// Returns the previous invocation count, and records this invocation
fn next_count(counter_file: &Path) -> anyhow::Result<u32> {
    let count = match std::fs::read_to_string(counter_file) {
        Ok(contents) if contents.trim().is_empty() => 0,
        Ok(contents) => contents.trim().parse().context("counter file contents")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err).context("counter file read"),
    };
    std::fs::write(counter_file, format!("{}", count + 1)).context("counter file write")?;
    Ok(count)
}
