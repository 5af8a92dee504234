//! KnitScript to knitout CLI
//!
//! Usage:
//!   ks2knitout pattern.ks -o pattern.k
//!   ks2knitout -e "Carrier = c1; in Leftward direction { knit f2, f1, f0; }"
//!   ks2knitout pattern.ks --config machine.json --graph graph.json
//!   ks2knitout pattern.ks --json

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use knit_script::{Interpreter, InterpreterOptions, MachineConfig};

#[derive(ClapParser, Debug)]
#[command(name = "ks2knitout")]
#[command(author = "Knitting Team")]
#[command(version = "0.1.0")]
#[command(about = "Runs KnitScript programs on a simulated knitting machine and writes knitout")]
struct Args {
    /// KnitScript file to run; reads stdin when neither this nor -e is given
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Run this program text instead of a file
    #[arg(short = 'e', long = "eval")]
    source: Option<String>,

    /// Write knitout here instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Machine configuration as JSON
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Write the knit graph as JSON to this file
    #[arg(short = 'g', long = "graph")]
    graph: Option<PathBuf>,

    /// Directory of `.ks` standard library modules
    #[arg(long = "stdlib")]
    stdlib: Option<PathBuf>,

    /// Where to write partial knitout when the program fails
    #[arg(long = "error-dump", default_value = "error.k")]
    error_dump: PathBuf,

    /// Print a JSON run report instead of knitout
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "knit_script=warn",
        1 => "knit_script=info",
        2 => "knit_script=debug",
        _ => "knit_script=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose > 1)
        .init();
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context.red().bold(), error);
    process::exit(1);
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let machine = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("Failed to read '{}'", path.display()), e));
            MachineConfig::from_json(&json).unwrap_or_else(|e| fail("Invalid machine configuration", e))
        }
        None => MachineConfig::default(),
    };
    let mut options = InterpreterOptions::new(machine);
    options.stdlib_path = args.stdlib.clone();
    options.error_dump = Some(args.error_dump.clone());

    let mut interpreter = Interpreter::new(options);
    let result = if let Some(source) = &args.source {
        interpreter.run_source(source, None)
    } else if let Some(path) = &args.input {
        interpreter.run_file(path)
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail("Failed to read stdin", e));
        interpreter.run_source(&buffer, None)
    };

    if let Err(error) = result {
        eprintln!("{}: {}", error.type_name().red().bold(), error);
        eprintln!(
            "{} partial knitout written to {}",
            "note:".yellow(),
            args.error_dump.display()
        );
        process::exit(1);
    }

    let output = interpreter.into_output();

    if let Some(path) = &args.graph {
        let json = output
            .machine
            .graph()
            .to_json()
            .unwrap_or_else(|e| fail("Failed to serialize knit graph", e));
        fs::write(path, json).unwrap_or_else(|e| fail(&format!("Failed to write '{}'", path.display()), e));
    }

    if args.json_output {
        match serde_json::to_string_pretty(&output.report()) {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Failed to serialize to JSON", e),
        }
        return;
    }

    let knitout = output.knitout.to_knitout();
    match &args.output {
        Some(path) => {
            fs::write(path, &knitout)
                .unwrap_or_else(|e| fail(&format!("Failed to write '{}'", path.display()), e));
            if args.verbose > 0 {
                println!(
                    "{} {} knitout lines to {}",
                    "Wrote".green().bold(),
                    output.knitout.len(),
                    path.display()
                );
            }
        }
        None => print!("{}", knitout),
    }
}

