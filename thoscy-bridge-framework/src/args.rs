//! CLI argument parsing shared by the relays.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments, flattened into each relay's own argument struct.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
    /// Path to JSON5 configuration file.
    #[arg(short = 'f', long = "file", alias = "config")]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging, use -vv for trace verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl BridgeArgs {
    /// Log level requested on the command line, if any.
    ///
    /// `--log-level` wins over `-v`.
    pub fn log_level_override(&self) -> Option<String> {
        if let Some(ref level) = self.log_level {
            return Some(level.clone());
        }
        match self.verbose {
            0 => None,
            1 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        bridge: BridgeArgs,
    }

    #[test]
    fn test_args_parse() {
        let cli = TestCli::parse_from(["test", "-f", "thoscy.json5", "-vv"]);
        assert_eq!(cli.bridge.config, Some(PathBuf::from("thoscy.json5")));
        assert_eq!(cli.bridge.verbose, 2);
        assert_eq!(cli.bridge.log_level_override(), Some("trace".to_string()));
    }

    #[test]
    fn test_log_level_wins_over_verbose() {
        let cli = TestCli::parse_from(["test", "-v", "--log-level", "warn"]);
        assert_eq!(cli.bridge.log_level_override(), Some("warn".to_string()));
    }

    #[test]
    fn test_no_override() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.bridge.config, None);
        assert_eq!(cli.bridge.log_level_override(), None);
    }
}
