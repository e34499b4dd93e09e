//! Configuration loading helpers for the `neat` binary.
//!
//! Leading configuration flags are handed to `ortho-config`; the remaining
//! tokens are parsed by `clap` as the subcommand.

use std::ffi::{OsStr, OsString};

use neat_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of [`neat_config::Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--compose-file",
    "--stagger-ms",
    "--hook-shell",
    "--hook-timeout-secs",
    "--report-path",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration for the CLI.
    ///
    /// Configuration flags must appear before the subcommand. Flags after it
    /// are parsed as subcommand arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let Some(flag) = text.split('=').next().filter(|flag| flag.starts_with("--")) else {
        return FlagAction::Stop;
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !text.contains('='),
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments split between the configuration loader and `clap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by the subcommand tokens.
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut remaining = args.iter();
    let program: Vec<OsString> = remaining.next().cloned().into_iter().collect();
    let mut config_arguments = program.clone();
    let mut command_arguments = program;

    while let Some(argument) = remaining.next() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                if needs_value {
                    config_arguments.extend(remaining.next().cloned());
                }
            }
            FlagAction::Stop => {
                command_arguments.push(argument.clone());
                command_arguments.extend(remaining.by_ref().cloned());
                break;
            }
        }
    }

    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case::inline("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case::separate("--stagger-ms", FlagAction::Include { needs_value: true })]
    #[case::subcommand("compose", FlagAction::Stop)]
    #[case::unknown("--file", FlagAction::Stop)]
    fn classifies_arguments(#[case] raw: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(raw)), expected);
    }

    #[test]
    fn splits_leading_configuration_flags() {
        let split = split_config_arguments(&os(&[
            "neat",
            "--log-format",
            "json",
            "--stagger-ms=5",
            "compose",
            "--file",
            "batch.yaml",
        ]));
        assert_eq!(
            split.config_arguments,
            os(&["neat", "--log-format", "json", "--stagger-ms=5"])
        );
        assert_eq!(
            split.command_arguments,
            os(&["neat", "compose", "--file", "batch.yaml"])
        );
    }

    #[test]
    fn configuration_flags_after_the_subcommand_stay_with_it() {
        let split = split_config_arguments(&os(&["neat", "variants", "--log-filter", "debug"]));
        assert_eq!(split.config_arguments, os(&["neat"]));
        assert_eq!(
            split.command_arguments,
            os(&["neat", "variants", "--log-filter", "debug"])
        );
    }

    #[test]
    fn empty_arguments_split_into_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(split.command_arguments.is_empty());
    }
}
