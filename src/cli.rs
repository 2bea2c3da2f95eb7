use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// revloop: phase-orchestrated code review
#[derive(Parser, Debug, Clone)]
#[command(name = "revloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: .revloop.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Retries per phase after the first attempt
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Sub-workers allowed to run at once
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    /// Phase transitions allowed per machine before stopping
    #[arg(long, global = true)]
    pub max_iterations: Option<u32>,

    /// Timeout for one phase attempt, in seconds
    #[arg(long, global = true)]
    pub phase_timeout_seconds: Option<u64>,

    /// Reasoner backend (claude, codex, http)
    #[arg(long, global = true)]
    pub reasoner: Option<String>,

    /// Reasoner CLI binary (default: claude or codex)
    #[arg(long, global = true)]
    pub reasoner_binary: Option<String>,

    /// Model passed to the reasoner
    #[arg(long, global = true)]
    pub reasoner_model: Option<String>,

    /// Chat-completions endpoint for the http reasoner
    #[arg(long, global = true)]
    pub reasoner_url: Option<String>,

    /// Environment variable holding the http reasoner API key
    #[arg(long, global = true)]
    pub reasoner_api_key_env: Option<String>,

    /// Timeout for one sub-worker, in seconds
    #[arg(long, global = true)]
    pub subworker_timeout_seconds: Option<u64>,

    /// Timeout for one tool command, in seconds
    #[arg(long, global = true)]
    pub tool_timeout_seconds: Option<u64>,

    /// First retry delay in milliseconds (doubles per retry)
    #[arg(long, global = true)]
    pub retry_backoff_ms: Option<u64>,

    /// Programs sub-workers may run (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub allowed_tools: Option<Vec<String>>,

    /// Directory with prompt template overrides
    #[arg(long, global = true)]
    pub prompts_dir: Option<String>,

    /// Branch the change is compared against (default: main)
    #[arg(long, global = true)]
    pub base_branch: Option<String>,

    /// Cap on captured tool stdout, in bytes
    #[arg(long, global = true)]
    pub max_output_bytes: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Review a change and print the report as JSON
    Review {
        /// Change title (default: subject of HEAD)
        #[arg(long)]
        title: Option<String>,

        /// Change description
        #[arg(long)]
        description: Option<String>,

        /// Read the diff from a file instead of git
        #[arg(long, conflicts_with = "base")]
        diff_file: Option<PathBuf>,

        /// Diff `<base>...HEAD` (default: the configured base branch)
        #[arg(long)]
        base: Option<String>,

        /// Write the run log as JSON to this path
        #[arg(long)]
        run_log: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_review_defaults() {
        let cli = Cli::parse_from(["revloop", "review"]);
        let CliCommand::Review {
            title,
            diff_file,
            base,
            run_log,
            ..
        } = cli.command;
        assert!(title.is_none());
        assert!(diff_file.is_none());
        assert!(base.is_none());
        assert!(run_log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_review_with_options() {
        let cli = Cli::parse_from([
            "revloop",
            "review",
            "--title",
            "Add cache",
            "--diff-file",
            "change.diff",
            "--run-log",
            "log.json",
        ]);
        let CliCommand::Review {
            title,
            diff_file,
            run_log,
            ..
        } = cli.command;
        assert_eq!(title.as_deref(), Some("Add cache"));
        assert_eq!(diff_file, Some(PathBuf::from("change.diff")));
        assert_eq!(run_log, Some(PathBuf::from("log.json")));
    }

    #[test]
    fn test_diff_file_conflicts_with_base() {
        let result = Cli::try_parse_from([
            "revloop",
            "review",
            "--diff-file",
            "x.diff",
            "--base",
            "develop",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::parse_from([
            "revloop",
            "review",
            "--max-concurrency",
            "2",
            "--allowed-tools",
            "git,rg",
            "--reasoner",
            "codex",
        ]);
        assert_eq!(cli.max_concurrency, Some(2));
        assert_eq!(
            cli.allowed_tools,
            Some(vec!["git".to_string(), "rg".to_string()])
        );
        assert_eq!(cli.reasoner.as_deref(), Some("codex"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["revloop"]).is_err());
    }
}
