use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use scm::reader::Reader;
use scm::{Config, Machine, SchemeError};

/// Scheme runtime REPL and file runner.
#[derive(Parser, Debug)]
#[command(name = "scm", version, about)]
struct Args {
    /// Collectible cells in the arena (overrides SCM_ARENA_CELLS)
    #[arg(long)]
    arena_cells: Option<usize>,

    /// Root-protection stack slots (overrides SCM_ROOT_SLOTS)
    #[arg(long)]
    root_slots: Option<usize>,

    /// Source file to evaluate before reading stdin (repeatable)
    #[arg(long = "load", value_name = "FILE")]
    load: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(cells) = args.arena_cells {
        config = config.with_arena_cells(cells);
    }
    if let Some(slots) = args.root_slots {
        config = config.with_root_slots(slots);
    }
    debug!(?config, "starting runtime");

    let mut machine = Machine::new(&config).context("failed to initialize the runtime")?;

    for path in &args.load {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        machine
            .run(&source)
            .with_context(|| format!("error while loading {}", path.display()))?;
        info!(path = %path.display(), "loaded");
    }

    if io::stdin().is_terminal() {
        println!("scm ({} cells, {} root slots)", config.arena_cells, config.root_slots);
        run_interactive(&mut machine)
    } else {
        run_piped(&mut machine)
    }
}

/// Interactive REPL: accumulate lines until parens are balanced.
fn run_interactive(machine: &mut Machine) -> Result<()> {
    let stdin = io::stdin();
    let mut buf = String::new();

    loop {
        print!("{}", if buf.is_empty() { "> " } else { "  " });
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        buf.push_str(&line);

        if open_parens(&buf) <= 0 {
            let input = std::mem::take(&mut buf);
            if !input.trim().is_empty() {
                eval_and_print(&input, machine);
            }
        }
    }
}

/// Unclosed `(` count in `text`, ignoring parens inside strings, `;`
/// comments and `#\(` / `#\)` character literals. An unterminated string
/// counts as still open.
fn open_parens(text: &str) -> i32 {
    let mut depth = 0;
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'"' => loop {
                match bytes.next() {
                    Some(b'\\') => {
                        bytes.next();
                    }
                    Some(b'"') => break,
                    Some(_) => {}
                    None => return depth.max(0) + 1,
                }
            },
            b';' => {
                for c in bytes.by_ref() {
                    if c == b'\n' {
                        break;
                    }
                }
            }
            b'#' => {
                if bytes.clone().next() == Some(b'\\') {
                    bytes.next();
                    bytes.next();
                }
            }
            _ => {}
        }
    }
    depth
}

/// Piped mode: read everything, then evaluate one datum at a time.
fn run_piped(machine: &mut Machine) -> Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    eval_and_print(&input, machine);
    Ok(())
}

/// Evaluate each datum in `input`, printing every result. Errors are
/// reported and evaluation moves on to the next datum; a read error ends
/// the batch.
fn eval_and_print(input: &str, machine: &mut Machine) {
    let mut pos = 0;
    loop {
        let mut reader = Reader::starting_at(input, pos, &mut machine.heap);
        let expr = match reader.read() {
            Ok(Some(expr)) => expr,
            Ok(None) => break,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        };
        pos = reader.position();

        let val = machine.eval(expr);
        if machine.heap.is_error(val) {
            eprintln!("Error: {}", SchemeError::from_value(&machine.heap, val));
        } else {
            println!("{}", machine.print(val));
        }
    }
}
