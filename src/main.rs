use earbud_labels::inventory::{SystemProfiler, DEFAULT_FAMILY};
use earbud_labels::{Compositor, LabelConfig, LpSpooler, Pipeline, PipelineConfig};

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Print barcode labels for the case and both earpieces of paired earbuds.
#[derive(Parser)]
#[command(name = "earbud-labels", version)]
struct Cli {
    /// More log output (-v: debug, -vv: trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// The accessory family as named in the Bluetooth inventory
    #[arg(long, default_value = DEFAULT_FAMILY, global = true)]
    family: String,

    /// The destination printer (default: the system default printer)
    #[arg(short = 'd', long, env = "LABEL_PRINTER", global = true)]
    printer: Option<String>,

    /// A font file to load for the label text
    #[arg(long, env = "LABEL_FONT", global = true)]
    font: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the serial numbers and whether all components are present
    Status,

    /// Compose the labels and send them to the printer
    Print {
        /// Print even if not all components have been found
        #[arg(long)]
        partial: bool,

        /// Copies per label
        #[arg(short = 'n', long, default_value_t = 1)]
        copies: u32,

        /// Keep the label images in this directory
        #[arg(long)]
        keep: Option<PathBuf>,
    },

    /// Compose the labels into a directory without printing
    Preview {
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr, the report to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let label_config = LabelConfig {
        font_file: cli.font,
        ..Default::default()
    };

    let mut pipeline_config = PipelineConfig {
        family: cli.family,
        ..Default::default()
    };

    match &cli.command {
        Command::Status => {}
        Command::Print { copies, keep, .. } => {
            pipeline_config.copies = *copies;
            pipeline_config.output_dir = keep.clone();
        }
        Command::Preview { out } => {
            pipeline_config.print = false;
            pipeline_config.output_dir = Some(out.clone());
        }
    }

    let mut pipeline = Pipeline::new(
        SystemProfiler::new(),
        Compositor::new(label_config)?,
        LpSpooler::new(cli.printer.as_deref()),
        pipeline_config,
    );

    match cli.command {
        Command::Status => {
            let serials = pipeline.connection_state();
            print!("{}", serials);

            if serials.all_found() {
                println!("{} connected", pipeline.config().family);
            } else {
                println!("{} not connected", pipeline.config().family);
            }

            Ok(ExitCode::SUCCESS)
        }

        Command::Print { partial, .. } => {
            // Without --partial, only a complete set is printed.
            if !partial {
                let serials = pipeline.connection_state();

                if !serials.all_found() {
                    print!("{}", serials);
                    println!(
                        "{} not connected. Cannot print labels (use --partial to print what was found).",
                        pipeline.config().family
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }

            let summary = pipeline.print_all();
            print!("{}", summary);

            if summary.nothing_to_print() || (summary.printed() < summary.print_attempts()) {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Command::Preview { .. } => {
            let summary = pipeline.run();
            print!("{}", summary);

            if summary.nothing_to_print() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
