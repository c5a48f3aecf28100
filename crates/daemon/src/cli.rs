//! Command line interface

use crate::config::EnablerConfig;
use clap::Parser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "cm6206-enabler")]
#[command(version, about = "Activate the outputs of CM6206 based USB audio adapters")]
#[command(long_about = "
C-Media CM6206 USB audio adapters enumerate as ordinary USB audio devices
but keep their outputs switched off until told otherwise. This tool sends
the activation commands to every attached adapter.

EXAMPLES:
    # Activate all attached adapters once
    cm6206-enabler

    # Stay resident, re-activating on hot-plug and after system sleep
    cm6206-enabler -d

    # Daemon mode with informational logging
    cm6206-enabler -d -v

CONFIGURATION:
    Optional. Looked up in the following order:
    1. Path specified with --config
    2. ~/.config/cm6206-enabler/config.toml
    3. /etc/cm6206-enabler/config.toml
    4. Built-in defaults
")]
pub struct Args {
    /// Silent: suppress all non-fatal diagnostics
    #[arg(short, long, overrides_with = "verbose")]
    pub silent: bool,

    /// Verbose: report progress (default outside daemon mode)
    #[arg(short, long, overrides_with = "silent")]
    pub verbose: bool,

    /// Daemon mode: stay resident and handle hot-plug and sleep/wake
    /// (silent by default)
    #[arg(short, long)]
    pub daemon: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    pub save_config: bool,

    /// Log level (trace, debug, info, warn, error); overrides -s and -v
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Args {
    /// Parse, dropping unknown arguments instead of failing
    ///
    /// Returns the parsed arguments and every argument that was ignored.
    /// Help, version and malformed known arguments are returned as errors.
    pub fn parse_lenient<I, T>(args: I) -> Result<(Self, Vec<String>), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut ignored = Vec::new();

        loop {
            let error = match Self::try_parse_from(&args) {
                Ok(parsed) => return Ok((parsed, ignored)),
                Err(e) if e.kind() == ErrorKind::UnknownArgument => e,
                Err(e) => return Err(e),
            };

            let Some(ContextValue::String(unknown)) = error.get(ContextKind::InvalidArg) else {
                return Err(error);
            };
            let unknown = unknown.clone();
            let with_value = format!("{}=", unknown);

            // Index 0 is the binary name
            let position = args.iter().skip(1).position(|arg| {
                arg.to_str()
                    .is_some_and(|arg| arg == unknown || arg.starts_with(&with_value))
            });

            match position {
                Some(index) => {
                    args.remove(index + 1);
                    ignored.push(unknown);
                }
                None => return Err(error),
            }
        }
    }

    /// Configuration file named with `--config`, tilde expanded
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.as_deref().map(crate::config::expand_path)
    }

    /// Effective log level
    ///
    /// `--log-level` beats `-s`/`-v`, which beat the config file, which beats
    /// the mode default.
    pub fn log_level(&self, config: &EnablerConfig) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if self.silent {
            return "error".to_string();
        }
        if self.verbose {
            return "info".to_string();
        }
        if let Some(level) = &config.general.log_level {
            return level.clone();
        }
        if self.daemon {
            "error".to_string()
        } else {
            "info".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (Args, Vec<String>) {
        let mut argv = vec!["cm6206-enabler"];
        argv.extend_from_slice(args);
        Args::parse_lenient(argv).unwrap()
    }

    #[test]
    fn test_flags() {
        let (args, ignored) = parse(&["-d", "-v"]);
        assert!(args.daemon);
        assert!(args.verbose);
        assert!(!args.silent);
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_last_of_silent_and_verbose_wins() {
        let (args, _) = parse(&["-s", "-v"]);
        assert!(args.verbose && !args.silent);

        let (args, _) = parse(&["-v", "-s"]);
        assert!(args.silent && !args.verbose);
    }

    #[test]
    fn test_unknown_arguments_are_ignored() {
        let (args, ignored) = parse(&["--frobnicate", "-d", "--color=always"]);
        assert!(args.daemon);
        assert_eq!(ignored.len(), 2);
        assert_eq!(ignored[0], "--frobnicate");
        assert!(ignored[1].starts_with("--color"));
    }

    #[test]
    fn test_help_and_version_are_errors_to_display() {
        let help = Args::parse_lenient(["cm6206-enabler", "-h"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);

        let version = Args::parse_lenient(["cm6206-enabler", "-V"]).unwrap_err();
        assert_eq!(version.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_log_level_precedence() {
        let mut config = EnablerConfig::default();

        let (args, _) = parse(&[]);
        assert_eq!(args.log_level(&config), "info");

        let (args, _) = parse(&["-d"]);
        assert_eq!(args.log_level(&config), "error");

        config.general.log_level = Some("debug".to_string());
        assert_eq!(args.log_level(&config), "debug");

        let (args, _) = parse(&["-d", "-v"]);
        assert_eq!(args.log_level(&config), "info");

        let (args, _) = parse(&["-s", "--log-level", "trace"]);
        assert_eq!(args.log_level(&config), "trace");
    }
}
