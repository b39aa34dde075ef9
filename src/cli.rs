//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};

/// Drive a probe session against a scripted or bridged provider.
#[derive(Debug, Parser)]
#[command(name = "probe", version)]
pub struct Args {
    /// Path to config file (default: ./probe.toml or ~/.config/probe/probe.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one request and print its progress.
    Run {
        /// Prompt sent as the request message.
        prompt: String,

        /// JSON script replayed by an in-process provider.
        #[arg(long = "script", conflicts_with = "remote", required_unless_present = "remote")]
        script: Option<String>,

        /// Command that starts a provider host speaking the bridge protocol
        /// on its stdio, e.g. `--remote probe serve --script demo.json`.
        #[arg(long = "remote", num_args = 1.., allow_hyphen_values = true, value_name = "CMD")]
        remote: Option<Vec<String>>,

        /// Write the finished session as JSON to this path.
        #[arg(long = "export", value_name = "FILE")]
        export: Option<String>,
    },
    /// Serve a scripted provider over stdin/stdout.
    Serve {
        #[arg(long = "script")]
        script: String,

        /// Id announced for the served provider (default: the configured provider).
        #[arg(long = "provider-id")]
        provider_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::{Args, Command};
    use clap::Parser;

    #[test]
    fn run_parses_with_script() {
        let args = Args::parse_from(["probe", "run", "explain", "--script", "demo.json"]);
        match args.command {
            Command::Run {
                prompt,
                script,
                remote,
                export,
            } => {
                assert_eq!(prompt, "explain");
                assert_eq!(script.as_deref(), Some("demo.json"));
                assert!(remote.is_none());
                assert!(export.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_collects_remote_command_with_flags() {
        let args = Args::parse_from([
            "probe", "run", "explain", "--export", "out.json", "--remote", "probe", "serve",
            "--script", "demo.json",
        ]);
        match args.command {
            Command::Run {
                remote, export, script, ..
            } => {
                assert_eq!(
                    remote,
                    Some(vec![
                        "probe".to_string(),
                        "serve".to_string(),
                        "--script".to_string(),
                        "demo.json".to_string(),
                    ])
                );
                assert_eq!(export.as_deref(), Some("out.json"));
                assert!(script.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_a_provider_source() {
        assert!(Args::try_parse_from(["probe", "run", "explain"]).is_err());
    }

    #[test]
    fn serve_parses_provider_id_and_global_config() {
        let args = Args::parse_from([
            "probe",
            "serve",
            "--script",
            "demo.json",
            "--provider-id",
            "remote",
            "--config",
            "probe.toml",
        ]);
        assert_eq!(args.config.as_deref(), Some("probe.toml"));
        match args.command {
            Command::Serve {
                script,
                provider_id,
            } => {
                assert_eq!(script, "demo.json");
                assert_eq!(provider_id.as_deref(), Some("remote"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
