use clap::{Parser, Subcommand};
use console::style;
use voxelmask::commands::{self, deidentify::RunArgs, profiles::ProfilesArgs};

#[derive(Parser)]
#[command(
    name = "deidentify",
    version,
    about = "Governed, copy-out de-identification engine for medical imaging studies"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// De-identify a set of input medical-image objects into an evidence
    /// bundle and an ordered output archive.
    Run(RunArgs),
    /// List the closed set of recognised compliance profiles.
    Profiles(ProfilesArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run(args) => commands::deidentify::run(args),
        Command::Profiles(args) => commands::profiles::run(args),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            std::process::exit(1);
        }
    }
}
