mod applier;
mod checker;
mod cml;
mod compiler;
mod config;
mod device;
mod error;
mod netbox;
mod retriever;
mod testbed;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checker::VersionExpectation;
use cml::CmlClient;
use config::Config;
use device::SshDriver;
use netbox::NetBoxClient;
use retriever::JumpHostLogin;
use testbed::Testbed;

#[derive(Parser)]
#[command(
    name = "labforge",
    about = "Lab pipeline stages: compile configs, fetch the testbed, apply configs, check versions",
    version
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one config per inventory device from the tag -> template mapping
    Compile {
        /// Directory the rendered configs are written to (created if missing)
        output_dir: PathBuf,

        /// Tag -> template JSON mapping [default: $TEMPLATE_MAPPING]
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Template directory [default: $TEMPLATES_DIR]
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Only compile the mapping entry for this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Export the lab's testbed and set the jump host credentials
    Testbed {
        /// Lab title on the lab platform
        lab_name: String,

        /// Where to write the testbed YAML
        output_file: PathBuf,
    },

    /// Push rendered configs to the testbed devices they are named after
    Apply {
        testbed_file: PathBuf,

        /// Directory of rendered configs from the compile stage
        config_dir: PathBuf,

        /// Resolve devices and report what would be pushed, without connecting
        #[arg(long)]
        dry_run: bool,
    },

    /// Check every device (except the jump host) runs the expected version
    Check {
        testbed_file: PathBuf,

        /// Also write the results as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A .env file is optional; real environment variables win
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "labforge=debug" } else { "labforge=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::debug!("Configuration: {:?}", cfg);

    match cli.command {
        Commands::Compile {
            output_dir,
            mapping,
            templates,
            tag,
        } => {
            let mapping = mapping.unwrap_or_else(|| PathBuf::from(&cfg.template_mapping));
            let templates = templates.unwrap_or_else(|| PathBuf::from(&cfg.templates_dir));

            let nb = NetBoxClient::new(cfg.netbox_url.clone(), cfg.netbox_token.clone(), cfg.http_timeout())?;
            if !nb.test_connection().await {
                tracing::warn!("NetBox at {} did not answer the status check", cfg.netbox_url);
            }

            let summary = compiler::compile(&nb, &mapping, &templates, &output_dir, tag.as_deref()).await?;
            tracing::info!(
                "Compiled {} config(s) for {} tag(s) into {}",
                summary.written.len(),
                summary.tags,
                output_dir.display()
            );
        }

        Commands::Testbed {
            lab_name,
            output_file,
        } => {
            let mut cml = CmlClient::new(cfg.cml_url.clone(), cfg.cml_verify_tls, cfg.http_timeout())?;
            cml.authenticate(&cfg.cml_username, &cfg.cml_password).await?;

            let jump = JumpHostLogin {
                alias: &cfg.jump_host_alias,
                username: &cfg.jump_host_username,
                password: &cfg.jump_host_password,
            };
            retriever::retrieve_testbed(&cml, &lab_name, &jump, &output_file).await?;
        }

        Commands::Apply {
            testbed_file,
            config_dir,
            dry_run,
        } => {
            let testbed = Testbed::load(&testbed_file)?;
            let summary =
                applier::apply_configs(&testbed, &config_dir, &SshDriver, cfg.ssh_timeout(), dry_run).await?;

            if !summary.failed.is_empty() {
                let devices: Vec<&str> = summary.failed.iter().map(|(d, _)| d.as_str()).collect();
                return Err(anyhow::anyhow!(
                    "Configuration push failed for {} device(s): {}",
                    devices.len(),
                    devices.join(", ")
                ));
            }
        }

        Commands::Check {
            testbed_file,
            report,
        } => {
            let testbed = Testbed::load(&testbed_file)?;
            let expected = VersionExpectation {
                os: cfg.expected_os.clone(),
                version: cfg.expected_version.clone(),
            };

            let result = checker::check_versions(
                &testbed,
                &SshDriver,
                &expected,
                &cfg.jump_host_alias,
                cfg.ssh_timeout(),
            )
            .await;

            if let Some(path) = report {
                result.save(&path)?;
                tracing::info!("Wrote version report to {}", path.display());
            }

            if !result.passed {
                return Err(anyhow::anyhow!(
                    "Version check failed: {} mismatch(es), {} error(s), expected {} {}",
                    result.count(checker::Outcome::Mismatch),
                    result.count(checker::Outcome::Error),
                    expected.os,
                    expected.version
                ));
            }
            tracing::info!("All devices run {} {}", expected.os, expected.version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_positional_arguments() {
        let cli = Cli::try_parse_from(["labforge", "apply", "tb.yaml", "configs"]).unwrap();
        match cli.command {
            Commands::Apply {
                testbed_file,
                config_dir,
                dry_run,
            } => {
                assert_eq!(testbed_file, PathBuf::from("tb.yaml"));
                assert_eq!(config_dir, PathBuf::from("configs"));
                assert!(!dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_cli_missing_arguments_is_an_error() {
        assert!(Cli::try_parse_from(["labforge", "testbed", "Pipeline Lab"]).is_err());
        assert!(Cli::try_parse_from(["labforge", "compile"]).is_err());
        assert!(Cli::try_parse_from(["labforge", "check"]).is_err());
    }

    #[test]
    fn test_cli_verify_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
