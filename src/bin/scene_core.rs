use anyhow::Result;

#[cfg(feature = "cli")]
mod main {
    use super::*;
    use anyhow::bail;
    use clap::{Parser, Subcommand};
    use scene_core::{config::Config, run};
    use std::path::PathBuf;

    #[derive(Debug, Parser)]
    #[command(about = "Scene graph and point light shadowing demo", long_about = None)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Debug, Subcommand)]
    enum Command {
        /// Run the demo scene
        Run {
            /// Path to RON configuration file to use
            #[arg(short, long)]
            config: Option<PathBuf>,
            /// Number of frames to run
            #[arg(short, long, default_value_t = 10)]
            frames: usize,
        },
        /// Generate the default RON configuration file
        GenerateConfig {
            /// Path where the file should be written
            #[arg(short, long)]
            output_path: PathBuf,
            /// Overwrite any existing file at the given path
            #[arg(short, long)]
            force_overwrite: bool,
        },
    }

    pub fn main() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            Command::Run { config, frames } => {
                let config = match config {
                    Some(file_path) => Config::from_ron_file(file_path)?,
                    None => Config::default(),
                };
                run::run(config, frames)
            }
            Command::GenerateConfig {
                output_path,
                force_overwrite,
            } => {
                if !force_overwrite && output_path.exists() {
                    bail!("File {} already exists", output_path.display());
                }
                Config::default().write_ron_file(output_path)
            }
        }
    }
}

#[cfg(not(feature = "cli"))]
mod main {
    use super::*;

    pub fn main() -> Result<()> {
        anyhow::bail!("This binary requires the `cli` feature to be enabled.")
    }
}

fn main() -> Result<()> {
    main::main()
}
