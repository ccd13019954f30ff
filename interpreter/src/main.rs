use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser as ClapParser;

use finch_interpreter::Session;

#[derive(ClapParser, Debug)]
#[command(name = "finch", version, about = "Tree-walking interpreter for the Finch scripting language", long_about = None)]
struct Cli {
    /// Script to run; omit to start the REPL
    script: Option<PathBuf>,

    // Anything beyond the script path is a usage error; clap would reject
    // it with its own exit code, so collect and check it ourselves.
    #[arg(hide = true, trailing_var_arg = true)]
    extra: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Cli::parse();
    if !args.extra.is_empty() {
        eprintln!("Usage: finch [script]");
        process::exit(64);
    }

    match args.script {
        Some(script) => run_file(&script),
        None => run_prompt()?,
    }

    Ok(())
}

fn run_file(path: &Path) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file '{}': {}", path.display(), err);
            process::exit(74);
        }
    };

    let mut session = Session::new();
    session.run(&source);

    if session.had_error {
        process::exit(65);
    }
    if session.had_runtime_error {
        process::exit(70);
    }
}

fn run_prompt() -> io::Result<()> {
    let mut session = Session::new();
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let line = line.trim_end_matches(['\n', '\r']);
        if line == ".exit" {
            break;
        }

        session.run(line);
        session.reset();
    }

    Ok(())
}
