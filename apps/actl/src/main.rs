use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use ctl_state::{MetricsHub, MismatchPolicy, Report, RestoreOptions, DEFAULT_STATE_FILE};
use ctl_transport::MockSystem;

#[derive(Parser, Debug)]
#[command(
    name = "actl",
    version,
    about = "Save and restore sound-card control state",
    disable_help_subcommand = true
)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG)
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    debug: bool,

    /// Directory of YAML card descriptors backing the mock cards
    #[arg(long, global = true)]
    mock_dir: Option<PathBuf>,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    /// Print the per-card report as JSON
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save the state of one card (index or id) or of every card
    Store {
        /// State file; `-` writes standard output
        #[arg(short, long, default_value = DEFAULT_STATE_FILE)]
        file: PathBuf,
        card: Option<String>,
    },
    /// Load the state of one card (index or id) or of every card
    Restore {
        /// State file; `-` reads standard input
        #[arg(short, long, default_value = DEFAULT_STATE_FILE)]
        file: PathBuf,
        card: Option<String>,
        /// Match controls by identity only and keep going past bad controls
        #[arg(short = 'F', long, action = ArgAction::SetTrue)]
        force: bool,
        /// Decode and validate without writing to the cards
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Refuse to restore a control whose identity differs from the card
        #[arg(long, action = ArgAction::SetTrue)]
        strict_ids: bool,
    },
    /// List the cards and their controls
    Cards,
    /// Print the JSON schema of a card descriptor
    #[cfg(feature = "schema")]
    Schema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug);

    let metrics = if cli.metrics {
        Some(MetricsHub::new().map_err(anyhow::Error::msg)?)
    } else {
        None
    };
    let json = if !cli.json {
        None
    } else if stdout_carries_document(&cli.command) {
        Some(JsonSink::Stderr)
    } else {
        Some(JsonSink::Stdout)
    };
    let result = match cli.command {
        Commands::Store { file, card } => {
            store(cli.mock_dir.as_deref(), &file, card.as_deref())
                .and_then(|report| finish(&report, json, metrics.as_ref()))
        }
        Commands::Restore {
            file,
            card,
            force,
            dry_run,
            strict_ids,
        } => {
            let opts = RestoreOptions {
                force,
                dry_run,
                mismatch: if strict_ids {
                    MismatchPolicy::Strict
                } else {
                    MismatchPolicy::Warn
                },
            };
            restore(cli.mock_dir.as_deref(), &file, card.as_deref(), &opts)
                .and_then(|report| finish(&report, json, metrics.as_ref()))
        }
        Commands::Cards => list_cards(cli.mock_dir.as_deref(), cli.json),
        #[cfg(feature = "schema")]
        Commands::Schema => {
            let schema = schemars::schema_for!(ctl_transport::MockCardDesc);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    };
    if let Some(hub) = &metrics {
        eprint!("{}", hub.encode_text());
    }
    result
}

/// Where the `--json` report is printed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum JsonSink {
    Stdout,
    Stderr,
}

/// `store -f -` writes the state document to stdout.
fn stdout_carries_document(command: &Commands) -> bool {
    matches!(command, Commands::Store { file, .. } if file.as_path() == Path::new("-"))
}

fn setup_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    // Best-effort; stdout may carry the state document
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_system(dir: Option<&Path>) -> Result<MockSystem> {
    let dir = dir.ok_or_else(|| anyhow::anyhow!("provide --mock-dir <dir>"))?;
    ctl_transport::load_cards_dir(dir)
        .with_context(|| format!("loading cards from {}", dir.display()))
}

fn store(dir: Option<&Path>, file: &Path, card: Option<&str>) -> Result<Report> {
    let mut system = load_system(dir)?;
    ctl_state::save_state(&mut system, file, card)
        .with_context(|| format!("store to {}", file.display()))
}

fn restore(
    dir: Option<&Path>,
    file: &Path,
    card: Option<&str>,
    opts: &RestoreOptions,
) -> Result<Report> {
    let mut system = load_system(dir)?;
    let report = ctl_state::restore_state(&mut system, file, card, opts)
        .with_context(|| format!("restore from {}", file.display()))?;
    if opts.dry_run {
        info!("dry run, cards left unchanged");
    } else {
        system.save_cards()?;
    }
    Ok(report)
}

fn finish(report: &Report, json: Option<JsonSink>, metrics: Option<&MetricsHub>) -> Result<()> {
    if let Some(hub) = metrics {
        hub.record(report);
    }
    for card in &report.cards {
        info!(
            op = ?report.operation,
            card = %card.id,
            status = ?card.status,
            controls = card.controls,
            skipped = card.skipped,
            mismatches = card.mismatches,
            "card done"
        );
    }
    if let Some(sink) = json {
        let text = serde_json::to_string_pretty(report)?;
        match sink {
            JsonSink::Stdout => println!("{text}"),
            JsonSink::Stderr => eprintln!("{text}"),
        }
    }
    let failed: Vec<&str> = report.failed().map(|c| c.id.as_str()).collect();
    if !failed.is_empty() {
        anyhow::bail!("failed cards: {}", failed.join(", "));
    }
    Ok(())
}

fn list_cards(dir: Option<&Path>, json: bool) -> Result<()> {
    let system = load_system(dir)?;
    if json {
        let descs: Vec<_> = system.cards().map(|c| c.to_desc()).collect();
        println!("{}", serde_json::to_string_pretty(&descs)?);
        return Ok(());
    }
    for card in system.cards() {
        let info = card.info();
        println!("{}\t{}\t{}", info.index, info.id, info.name);
        for c in card.controls() {
            println!("\t{}\t{}\tx{}", c.info.id, c.info.elem_type, c.info.count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_report_stays_off_a_document_on_stdout() -> Result<()> {
        let cases: [(&[&str], bool); 5] = [
            (&["actl", "--json", "store", "-f", "-"], true),
            (&["actl", "store", "--file", "-", "PCH", "--json"], true),
            (&["actl", "--json", "store", "-f", "/tmp/asound.state"], false),
            (&["actl", "--json", "restore", "-f", "-"], false),
            (&["actl", "--json", "cards"], false),
        ];
        for (args, on_stdout) in cases {
            let cli = Cli::try_parse_from(args.iter().copied())?;
            assert!(cli.json);
            assert_eq!(stdout_carries_document(&cli.command), on_stdout, "{args:?}");
        }
        Ok(())
    }
}
