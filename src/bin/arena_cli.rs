//! Command-line driver for [`memarena`](memarena): parses region/alignment
//! flags, optionally runs a built-in self-test, and optionally drops into
//! an interactive REPL exposing `alloc`/`free`/`stats`/`layout`/`validate`.
//!
//! This binary is an external collaborator around the core library, not
//! part of its contract; it exists so the crate has something runnable to
//! drive by hand or from the integration tests.

use std::io::{self, BufRead, Write};

use clap::Parser;
use memarena::Arena;
use tracing_subscriber::EnvFilter;

/// A page-backed, size-segregated heap arena.
#[derive(Parser, Debug)]
#[command(name = "arena-cli", version, about)]
struct Cli {
    /// Region size in bytes.
    #[arg(short = 's', long = "size", default_value_t = 1 << 20)]
    size: usize,

    /// Alignment in bytes; must be a power of two of at least 8.
    #[arg(short = 'a', long = "alignment", default_value_t = 8)]
    alignment: usize,

    /// Name attached to the arena, used in log output.
    #[arg(short = 'n', long = "name", default_value = "arena")]
    name: String,

    /// Drop into an interactive REPL after startup.
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Run the built-in self-test and exit.
    #[arg(short = 't', long)]
    test: bool,

    /// Enable verbose per-operation debug logging.
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut filter = EnvFilter::from_default_env();
    if cli.debug {
        filter = filter.add_directive("memarena=debug".parse().unwrap());
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut arena = match Arena::init(cli.size, cli.alignment, cli.name.clone()) {
        Ok(arena) => arena,
        Err(err) => {
            eprintln!("failed to initialize arena: {err}");
            std::process::exit(1);
        }
    };
    arena.set_debug(cli.debug);

    // Interactive mode takes priority over `-t`, matching the original
    // driver's `if (interactive_mode) ... else if (run_tests) ...`.
    if cli.interactive {
        match run_repl(&mut arena) {
            Ok(()) => std::process::exit(0),
            Err(message) => {
                eprintln!("{message}");
                std::process::exit(1);
            }
        }
    }

    if cli.test {
        match run_self_test(&mut arena) {
            Ok(()) => {
                println!("self-test passed");
                std::process::exit(0);
            }
            Err(message) => {
                eprintln!("self-test failed: {message}");
                std::process::exit(1);
            }
        }
    }

    println!("{}", arena.stats());
}

/// Exercise alloc/free/validate through a small fixed sequence, the way
/// the original driver's `-t` flag runs a scripted smoke test instead of
/// waiting on stdin.
fn run_self_test(arena: &mut Arena) -> Result<(), String> {
    let a = arena.alloc(64).map_err(|e| e.to_string())?;
    let b = arena.alloc(128).map_err(|e| e.to_string())?;
    arena.validate().map_err(|e| e.to_string())?;
    arena.free(a.as_ptr()).map_err(|e| e.to_string())?;
    arena.free(b.as_ptr()).map_err(|e| e.to_string())?;
    arena.validate().map_err(|e| e.to_string())?;
    if arena.stats().used_bytes != 0 {
        return Err("used_bytes did not return to zero".into());
    }
    Ok(())
}

fn run_repl(arena: &mut Arena) -> Result<(), String> {
    let stdin = io::stdin();

    print_help();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).map_err(|e| e.to_string())? == 0 {
            break;
        }
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(c) => c,
            None => continue,
        };

        match command {
            "alloc" => {
                let Some(n) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
                    println!("usage: alloc <bytes>");
                    continue;
                };
                match arena.alloc(n) {
                    Ok(ptr) => println!("{:#010x}", ptr.as_ptr() as usize),
                    Err(err) => println!("alloc failed: {err}"),
                }
            }
            "free" => {
                let Some(address) = parts.next().and_then(parse_hex_address) else {
                    println!("usage: free <address-in-hex>");
                    continue;
                };
                match arena.free(address as *mut u8) {
                    Ok(()) => println!("freed {address:#010x}"),
                    Err(err) => println!("free failed: {err}"),
                }
            }
            "stats" => println!("{}", arena.stats()),
            "layout" => print!("{}", arena.dump()),
            "validate" => match arena.validate() {
                Ok(()) => println!("ok"),
                Err(violation) => println!("violation: {violation}"),
            },
            "debug" => {
                arena.set_debug(!arena.is_debug());
                println!("debug logging {}", if arena.is_debug() { "on" } else { "off" });
            }
            "test" => match run_self_test(arena) {
                Ok(()) => println!("self-test passed"),
                Err(message) => println!("self-test failed: {message}"),
            },
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("unknown command: {other} (try 'help')"),
        }
    }

    Ok(())
}

fn print_help() {
    println!("commands: alloc <n>, free <address-in-hex>, stats, layout, validate, debug, test, quit, help");
}

fn parse_hex_address(token: &str) -> Option<usize> {
    usize::from_str_radix(token.trim_start_matches("0x"), 16).ok()
}
