//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mnemo",
    version,
    about = "Answer questions from a local fragment memory with a pooled local language model",
    long_about = "Mnemo ranks stored memory fragments against a question with ONNX sentence embeddings \
                  and keyword boosts, then asks a local inference executable (such as llama-cli) to \
                  answer from the best fragments. Workers run in a bounded pool."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/mnemo/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question from the stored fragments
    Ask {
        /// Question to ask
        question: String,

        /// Number of fragments to put into the prompt
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict context to these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Print the fragments the answer was grounded on
        #[arg(long)]
        sources: bool,
    },

    /// Rank stored fragments against a query
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results scoring below this value (0.0 - 1.0)
        #[arg(long)]
        min_score: Option<f32>,

        /// Restrict results to these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the embedding of a text
    Embed {
        /// Text to embed
        text: String,

        /// Print the whole vector as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage stored fragments
    Fragments {
        #[command(subcommand)]
        action: FragmentsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FragmentsAction {
    /// List stored fragments
    List {
        /// Show only these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Count stored fragments per category
    Count,

    /// Embed and store a new fragment
    Add {
        /// Category label
        category: String,

        /// Fragment text
        content: String,
    },

    /// Delete a fragment by id
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Empty repeatable flags mean "no filter"
pub fn category_filter(categories: Vec<String>) -> Option<Vec<String>> {
    (!categories.is_empty()).then_some(categories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_flags() {
        let cli = Cli::try_parse_from([
            "mnemo",
            "--profile",
            "small",
            "search",
            "pool size",
            "-k",
            "3",
            "--min-score",
            "0.2",
            "--category",
            "Pool",
            "--category",
            "Worker",
        ])
        .unwrap();

        assert_eq!(cli.profile.as_deref(), Some("small"));
        match cli.command {
            Commands::Search {
                query,
                top_k,
                min_score,
                categories,
                json,
            } => {
                assert_eq!(query, "pool size");
                assert_eq!(top_k, Some(3));
                assert_eq!(min_score, Some(0.2));
                assert_eq!(categories, vec!["Pool", "Worker"]);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_category_filter() {
        assert_eq!(category_filter(Vec::new()), None);
        assert_eq!(
            category_filter(vec!["a".to_string()]),
            Some(vec!["a".to_string()])
        );
    }
}
