mod imports;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use gecko_core::{CompileOptions, CoreError, GuardPolicy, OutputKind, compile};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::imports::{LibraryIndex, load_tree};

/// Compile a Gecko token tree to C.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Token tree of the main file (JSON)")]
    input: PathBuf,

    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Where to write the C source (stdout when omitted)"
    )]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Kind::Executable)]
    kind: Kind,

    #[arg(
        long,
        value_name = "FILE",
        help = "Library header path (defaults to the output path with a .h extension)"
    )]
    header: Option<PathBuf>,

    #[arg(
        long = "lib-root",
        value_name = "DIR",
        help = "Directory searched for imported token trees; may be repeated"
    )]
    lib_roots: Vec<PathBuf>,

    #[arg(long, help = "Accept the integers 0 and 1 as conditional guards")]
    lenient_guards: bool,

    #[arg(short, long, action = ArgAction::Count, help = "More logging (-v info, -vv debug, -vvv trace)")]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    Executable,
    Library,
    Object,
}

impl From<Kind> for OutputKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Executable => OutputKind::Executable,
            Kind::Library => OutputKind::Library,
            Kind::Object => OutputKind::Object,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    let index = LibraryIndex::scan(&cli.lib_roots)?;
    let file = load_tree(&cli.input, &index)?;

    let options = CompileOptions {
        kind: cli.kind.into(),
        guard_policy: if cli.lenient_guards {
            GuardPolicy::Lenient
        } else {
            GuardPolicy::Strict
        },
    };
    info!("compiling {} as {:?}", cli.input.display(), options.kind);

    let artifact = match compile(&file, options) {
        Ok(artifact) => artifact,
        Err(CoreError::CompilationFailed(diagnostics)) => {
            for diagnostic in &diagnostics {
                eprintln!("{diagnostic}");
            }
            bail!("compilation failed with {} error(s)", diagnostics.len());
        }
        Err(CoreError::UnresolvedMethod {
            name,
            position,
            trace,
        }) => {
            let at = position.map(|p| format!(" [{p}]")).unwrap_or_default();
            eprintln!("error: could not find method '{name}'{at}");
            for frame in &trace {
                eprintln!("\t-> {frame}");
            }
            bail!("compilation aborted");
        }
        Err(err) => return Err(err).context("compilation aborted"),
    };

    match &cli.output {
        Some(path) => write_output(path, artifact.source.as_bytes())?,
        None => print!("{}", artifact.source),
    }

    if let Some(header) = &artifact.header {
        let path = cli
            .header
            .clone()
            .or_else(|| cli.output.as_ref().map(|output| output.with_extension("h")));
        match path {
            Some(path) => write_output(&path, header.as_bytes())?,
            None => warn!("library header not written: pass --output or --header"),
        }
    }

    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}
