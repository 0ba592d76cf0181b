use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use unicov::detect;
use unicov::ingest::{self, ParseSettings};

/// unicov: reads code coverage reports of different formats and merges
/// them into one unified result.
#[derive(Parser)]
#[command(name = "unicov", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the given reports and merge them into one summary.
    Merge {
        /// Paths of the coverage reports to merge.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Assembly filter, e.g. "+Included*" or "-Excluded*". Repeatable.
        #[arg(long = "assembly-filter")]
        assembly_filters: Vec<String>,

        /// Class filter. Repeatable.
        #[arg(long = "class-filter")]
        class_filters: Vec<String>,

        /// Source file filter. Repeatable.
        #[arg(long = "file-filter")]
        file_filters: Vec<String>,

        /// Directory searched when resolving source file paths.
        #[arg(long = "source-directory")]
        source_directories: Vec<String>,

        /// Keep compiler generated class and method names.
        #[arg(long)]
        raw: bool,

        /// Number of worker threads used for parsing.
        #[arg(long)]
        parallelism: Option<usize>,

        /// Decimal places of coverage quotas.
        #[arg(long, default_value_t = 1)]
        decimal_places: u8,

        /// Pretty-print the JSON summary.
        #[arg(long)]
        pretty: bool,
    },

    /// Detect the format of the given reports without parsing them.
    Detect {
        /// Paths of the coverage reports to inspect.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Merge {
            files,
            assembly_filters,
            class_filters,
            file_filters,
            source_directories,
            raw,
            parallelism,
            decimal_places,
            pretty,
        } => {
            let settings = ParseSettings {
                assembly_filters,
                class_filters,
                file_filters,
                source_directories,
                raw_mode: raw,
                parallelism,
                maximum_decimal_places: decimal_places,
            };
            cmd_merge(&files, &settings, pretty)
        }
        Commands::Detect { files } => cmd_detect(&files),
    }
}

fn cmd_merge(files: &[PathBuf], settings: &ParseSettings, pretty: bool) -> Result<()> {
    let result = ingest::parse_files(files, settings).context("Failed to parse reports")?;

    let mut classes = 0usize;
    let mut covered_lines = 0usize;
    let mut coverable_lines = 0usize;
    let mut covered_branches = 0usize;
    let mut total_branches = 0usize;
    for assembly in result.assemblies() {
        classes += assembly.classes().len();
        for class in assembly.classes() {
            for file in class.files() {
                covered_lines += file.covered_lines();
                coverable_lines += file.coverable_lines();
                covered_branches += file.covered_branches().unwrap_or(0);
                total_branches += file.total_branches().unwrap_or(0);
            }
        }
    }

    let mut summary = serde_json::json!({
        "parser": result.parser_name(),
        "assemblies": result.assemblies().len(),
        "classes": classes,
        "covered_lines": covered_lines,
        "coverable_lines": coverable_lines,
    });
    if result.supports_branch_coverage {
        summary["covered_branches"] = covered_branches.into();
        summary["total_branches"] = total_branches.into();
    }

    let text = if pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{text}");
    Ok(())
}

fn cmd_detect(files: &[PathBuf]) -> Result<()> {
    for path in files {
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match detect::detect(&content) {
            Ok(documents) if documents.is_empty() => {
                println!("{}: unknown", path.display());
            }
            Ok(documents) => {
                let formats = documents
                    .iter()
                    .map(|(format, _)| format.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{}: {}", path.display(), formats);
            }
            Err(error) => println!("{}: {}", path.display(), error),
        }
    }
    Ok(())
}
