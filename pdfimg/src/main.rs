use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use log::{error, info};
use pdf_image_replace::{Selector, UpdateOptions, export_images, update_image};

#[derive(Parser, Debug)]
#[command(name = "pdfimg", author, version, about = "Export or replace images in PDF documents")]
struct Cli {
    /// Source PDF document
    #[arg(short, long, global = true, value_name = "FILE")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write every image to <output>/<page>/<name>.<ext>
    Export {
        /// Directory to write page directories into
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },
    /// Replace one image on a page, writing <file stem>-updated.<ext>
    Update {
        /// 1-based page number
        #[arg(long)]
        page: u32,
        /// 1-based position among the page's images
        #[arg(long)]
        index: Option<u32>,
        /// Stored name of the image, case-insensitive
        #[arg(long)]
        name: Option<String>,
        /// Replacement image file
        #[arg(long, value_name = "FILE")]
        image: PathBuf,
        /// Save to this path instead of next to the source
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Flate compression level (0-9) for re-encoded images
        #[arg(long, default_value_t = 6)]
        compression_level: u32,
    },
}

fn run(file: PathBuf, command: Command) -> pdf_image_replace::Result<()> {
    match command {
        Command::Export { output } => {
            info!("Export images of {} to {}", file.display(), output.display());
            let summary = export_images(&file, &output)?;
            info!("Exported {} images, skipped {}", summary.files.len(), summary.skipped);
        }
        Command::Update {
            page,
            index,
            name,
            image,
            output,
            compression_level,
        } => {
            let selector = Selector::from_options(index, name.as_deref())?;
            let mut options = UpdateOptions::builder().compression_level(compression_level);
            if let Some(output) = output {
                options = options.output(output);
            }
            info!("Replace image with {} on page {} of {}", selector, page, file.display());
            let saved = update_image(&file, page, &selector, &image, &options.build())?;
            info!("Saved {}", saved.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(file) = cli.file else {
        Cli::command()
            .error(ErrorKind::MissingRequiredArgument, "the source PDF must be given with --file")
            .exit();
    };

    match run(file, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
