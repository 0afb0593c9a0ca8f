//! Command-line interface, parsed with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use osdr_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { question, session } => { /* answer once */ }
//!     Commands::Interactive { session } => { /* read-answer loop */ }
//!     Commands::Init => { /* write default config */ }
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Session used when none is given on the command line.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Config file to use instead of `<config_dir>/config.yaml`.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index the corpus and answer a single question.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        #[arg(short = 's', long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Index the corpus, then answer questions read from stdin until `exit`.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(short = 's', long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Write a default `config.yaml` to the config directory.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ask_with_session() {
        let cli = Cli::parse_from(["osdr", "ask", "What is OSD-48?", "-s", "lab"]);
        match cli.command {
            Commands::Ask { question, session } => {
                assert_eq!(question, "What is OSD-48?");
                assert_eq!(session, "lab");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn interactive_defaults_session() {
        let cli = Cli::parse_from(["osdr", "--config", "/tmp/c.yaml", "i"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Interactive { session } if session == DEFAULT_SESSION
        ));
    }

    #[test]
    fn ask_requires_a_question() {
        assert!(Cli::try_parse_from(["osdr", "ask"]).is_err());
    }
}
