//! h5gate CLI
//!
//! - `validate`: check a container snapshot against its specification
//! - `links`: print the refined link groups of a container
//! - `autogen`: compute autogen fields and write them back

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use h5gate_core::{GateError, LinkKind, LinkTracker, Report, Session, SessionOptions};
use h5gate_spec::{Registry, SpecSource};
use h5gate_store::{MemStore, OpenMode};

#[derive(Parser)]
#[command(name = "h5gate")]
#[command(
    author,
    version,
    about = "h5gate: specification-driven access to hierarchical containers"
)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a container against its specification (read-only).
    Validate {
        /// Container snapshot (JSON)
        container: PathBuf,
        #[command(flatten)]
        spec: SpecArgs,
        /// Report undeclared members of closed groups as warnings
        #[arg(long)]
        tolerant: bool,
    },

    /// Print the groups of paths that alias each other.
    Links {
        /// Container snapshot (JSON)
        container: PathBuf,
        /// Bound on soft-link chain length
        #[arg(long, default_value_t = h5gate_core::DEFAULT_MAX_LINK_HOPS)]
        max_hops: usize,
    },

    /// Compute autogen fields, write them and save the container.
    Autogen {
        /// Container snapshot (JSON)
        container: PathBuf,
        #[command(flatten)]
        spec: SpecArgs,
        /// Write the result here instead of overwriting the input
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SpecArgs {
    /// Namespace file (repeatable). Without one, the spec embedded in the
    /// container is used.
    #[arg(long = "spec")]
    specs: Vec<PathBuf>,
    /// Namespace that defines the root group
    #[arg(long)]
    default_ns: Option<String>,
    /// Session options as a JSON file
    #[arg(long)]
    options: Option<PathBuf>,
}

impl SpecArgs {
    fn session_options(&self, mode: OpenMode) -> Result<SessionOptions> {
        let options = match &self.options {
            Some(file) => {
                let text = std::fs::read_to_string(file)
                    .with_context(|| format!("reading options {}", file.display()))?;
                SessionOptions::from_json(&text)
                    .with_context(|| format!("parsing options {}", file.display()))?
            }
            None => SessionOptions::default(),
        };
        Ok(options.with_mode(mode))
    }

    fn registry(&self) -> Result<Option<Arc<Registry>>> {
        if self.specs.is_empty() {
            return Ok(None);
        }
        let sources = self
            .specs
            .iter()
            .map(SpecSource::from_file)
            .collect::<Result<Vec<_>, _>>()?;
        let registry = Registry::load(&sources, self.default_ns.as_deref())?;
        Ok(Some(Arc::new(registry)))
    }

    fn open(&self, container: &Path, options: SessionOptions) -> Result<Session<MemStore>> {
        let store = MemStore::open(container, options.mode)
            .with_context(|| format!("opening {}", container.display()))?;
        let session = match self.registry()? {
            Some(registry) => Session::open(store, registry, options)?,
            None => Session::open_embedded(store, self.default_ns.as_deref(), options)
                .context("no --spec given and the container has no usable embedded spec")?,
        };
        Ok(session)
    }
}

/// Install the fmt subscriber. Returns false when one is already installed.
fn init_tracing(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            container,
            spec,
            tolerant,
        } => cmd_validate(&container, &spec, tolerant),
        Commands::Links {
            container,
            max_hops,
        } => cmd_links(&container, max_hops),
        Commands::Autogen {
            container,
            spec,
            out,
        } => cmd_autogen(&container, &spec, out.as_deref()),
    }
}

fn print_report(report: &Report) {
    for d in &report.errors {
        println!("  {} [{}] {}: {}", "error".red().bold(), d.kind, d.path.cyan(), d.message);
    }
    for d in &report.warnings {
        println!("  {} [{}] {}: {}", "warning".yellow().bold(), d.kind, d.path.cyan(), d.message);
    }
}

/// Print the report of a failed close and turn it into the command's error.
fn failed(err: GateError) -> anyhow::Error {
    match err {
        GateError::ValidationFailed { report } => {
            print_report(&report);
            anyhow!(
                "{} error(s), {} warning(s)",
                report.errors.len(),
                report.warnings.len()
            )
        }
        other => other.into(),
    }
}

fn cmd_validate(container: &Path, spec: &SpecArgs, tolerant: bool) -> Result<()> {
    println!("{} {}", "Validating".green().bold(), container.display());
    let mut options = spec.session_options(OpenMode::Read)?;
    options.tolerant |= tolerant;
    let session = spec.open(container, options)?;
    println!(
        "  Namespaces: {}",
        session
            .registry()
            .namespaces()
            .map(|ns| ns.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
            .cyan()
    );
    println!("  Nodes: {}", session.tree().len());

    let closed = session.close().map_err(failed)?;
    print_report(&closed.report);
    println!(
        "{} ({} warning(s))",
        "Valid.".green(),
        closed.report.warnings.len()
    );
    Ok(())
}

fn cmd_links(container: &Path, max_hops: usize) -> Result<()> {
    let store = MemStore::open(container, OpenMode::Read)
        .with_context(|| format!("opening {}", container.display()))?;
    let tracker = LinkTracker::scan(&store, max_hops)?;
    let groups = tracker.groups();
    if groups.is_empty() {
        println!("{}", "No link groups.".yellow());
        return Ok(());
    }
    for group in groups {
        let kind = match group.kind() {
            LinkKind::Hard => "hard".green(),
            LinkKind::Soft => "soft".cyan(),
            LinkKind::External => "external".yellow(),
        };
        println!("{} {}", kind.bold(), group.key);
        for p in group.paths() {
            println!("  {} {}", "→".yellow(), p);
        }
    }
    Ok(())
}

fn cmd_autogen(container: &Path, spec: &SpecArgs, out: Option<&Path>) -> Result<()> {
    println!("{} {}", "Computing autogen fields".green().bold(), container.display());
    let options = spec.session_options(OpenMode::ReadWrite)?;
    let mut session = spec.open(container, options)?;
    session.run_autogen()?;
    let changed = session
        .directives()
        .iter()
        .filter(|d| d.state == h5gate_core::DirectiveState::Updated)
        .count();
    println!("  Directives: {} ({} written)", session.directives().len(), changed);

    let closed = session.close().map_err(failed)?;
    print_report(&closed.report);
    let target = out.unwrap_or(container);
    closed.store.save(target)?;
    println!("{} {}", "wrote".green().bold(), target.display().to_string().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_file_is_merged_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("options.json");
        std::fs::write(&file, r#"{"tolerant": true, "max_link_hops": 7}"#).unwrap();
        let args = SpecArgs {
            specs: Vec::new(),
            default_ns: None,
            options: Some(file),
        };
        let options = args.session_options(OpenMode::Read).unwrap();
        assert!(options.tolerant);
        assert_eq!(options.max_link_hops, 7);
        assert_eq!(options.mode, OpenMode::Read);
    }

    #[test]
    fn second_tracing_init_keeps_the_first_subscriber() {
        init_tracing(true);
        assert!(!init_tracing(false));
    }

    #[test]
    fn cli_parses_repeated_specs() {
        let cli = Cli::try_parse_from([
            "h5gate",
            "validate",
            "file.json",
            "--spec",
            "core.json",
            "--spec",
            "ext.json",
            "--default-ns",
            "core",
        ])
        .unwrap();
        let Commands::Validate { spec, tolerant, .. } = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(spec.specs.len(), 2);
        assert_eq!(spec.default_ns.as_deref(), Some("core"));
        assert!(!tolerant);
    }
}
