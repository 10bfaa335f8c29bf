use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Read and write ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip list archive.zip                 show the entries of archive.zip\n  \
  rezip extract archive.zip -d out       extract everything into out/\n  \
  rezip pack backup.zip docs notes.txt   pack docs/ and notes.txt\n  \
  rezip pack -P secret backup.zip docs   same, encrypted with ZipCrypto")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the entries of an archive
    List {
        /// ZIP file path
        #[arg(value_name = "FILE")]
        archive: PathBuf,
    },

    /// Extract all entries of an archive
    Extract {
        /// ZIP file path
        #[arg(value_name = "FILE")]
        archive: PathBuf,

        /// Extract into DIR instead of the current directory
        #[arg(short = 'd', long = "dir", value_name = "DIR")]
        output: Option<PathBuf>,

        /// Password for encrypted entries
        #[arg(short = 'P', long)]
        password: Option<String>,
    },

    /// Pack files and directories into a new archive
    Pack {
        /// Output ZIP path; must not already exist
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Files or directories to add
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Encrypt entries with this password
        #[arg(short = 'P', long)]
        password: Option<String>,

        /// Archive comment
        #[arg(long, value_name = "TEXT")]
        comment: Option<String>,
    },
}
