use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use moonlift::bytecode::{disasm, undump, Lua54};
use moonlift::Options;

#[derive(Parser, Debug)]
#[command(name = "moonlift", version, about = "Lua 5.4 bytecode decompiler")]
struct Cli {
    /// Log more (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct Lua source from compiled chunks.
    Decompile {
        #[command(flatten)]
        input: Input,

        /// Spaces per indentation level.
        #[arg(long, default_value_t = 2)]
        indent: usize,

        /// Do not list functions the main chunk never instantiates.
        #[arg(long)]
        no_trailing: bool,

        /// Keep labels that no `goto` refers to.
        #[arg(long)]
        labels: bool,
    },
    /// Print an annotated instruction listing.
    Disasm {
        #[command(flatten)]
        input: Input,
    },
}

#[derive(Args, Debug)]
struct Input {
    /// Chunk files, or directories searched for `.luac` files.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Write one file per input under this directory instead of stdout.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (input, extension, render): (_, _, Box<dyn Fn(&[u8]) -> Result<String>>) = match cli.command {
        Command::Decompile {
            input,
            indent,
            no_trailing,
            labels,
        } => {
            let mut options = Options {
                trailing: !no_trailing,
                labels,
                ..Options::default()
            };
            options.emit.indent = indent;
            let render = move |bytes: &[u8]| -> Result<String> {
                Ok(moonlift::decompile_chunk(bytes, &options)?)
            };
            (input, "lua", Box::new(render))
        }
        Command::Disasm { input } => {
            let render = |bytes: &[u8]| -> Result<String> {
                let chunk = undump(bytes)?;
                Ok(disasm::disassemble(&chunk.main, &Lua54))
            };
            (input, "txt", Box::new(render))
        }
    };

    let files = match expand_paths(&input.paths) {
        Ok(files) => files,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = 0;
    for file in &files {
        let result = fs::read(file)
            .with_context(|| format!("reading {}", file.display()))
            .and_then(|bytes| render(&bytes).with_context(|| file.display().to_string()))
            .and_then(|text| write_output(&input, file, extension, &text));
        if let Err(err) = result {
            error!("{err:#}");
            failed += 1;
        }
    }

    if files.len() > 1 {
        info!(files = files.len(), failed, "done");
    }
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Expand directories into the `.luac` files below them, sorted.
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_chunk_files(path, &mut files)
                .with_context(|| format!("scanning {}", path.display()))?;
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    Ok(files)
}

fn collect_chunk_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_chunk_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "luac") {
            out.push(path);
        }
    }
    Ok(())
}

fn write_output(input: &Input, file: &Path, extension: &str, text: &str) -> Result<()> {
    let Some(dir) = &input.output_dir else {
        if input.paths.len() > 1 || input.paths.iter().any(|p| p.is_dir()) {
            println!("-- {}", file.display());
        }
        print!("{text}");
        return Ok(());
    };

    let name = file.file_name().unwrap_or(file.as_os_str());
    let target = dir.join(name).with_extension(extension);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&target, text).with_context(|| format!("writing {}", target.display()))?;
    info!(from = %file.display(), to = %target.display(), "wrote");
    Ok(())
}
