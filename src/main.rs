use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use logpulse::config::PipelineConfig;

#[derive(Parser)]
#[command(
    name = "logpulse",
    about = "Streaming log anomaly detection with remediation lookup",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume from Kafka and publish alerts until Ctrl-C
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Bootstrap brokers
        #[arg(long)]
        brokers: Option<String>,

        /// Raw log topic
        #[arg(long)]
        input_topic: Option<String>,

        /// Alert topic
        #[arg(long)]
        output_topic: Option<String>,

        /// Remediation result topic
        #[arg(long)]
        remediation_topic: Option<String>,

        /// Consumer group id
        #[arg(long)]
        group_id: Option<String>,

        /// Join a throwaway consumer group and re-read the topic
        #[arg(long)]
        fresh: bool,
    },

    /// Run the pipeline over a JSON-lines file and print results
    Replay {
        /// Input file, or `-` for stdin
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Probe a remediation lookup service
    CheckRemediation {
        /// Base URL of the lookup service
        #[arg(long)]
        url: String,

        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout_secs: u64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Remediation lookup service base URL
    #[arg(long)]
    remediation_url: Option<String>,

    /// Do not probe the lookup service at startup
    #[arg(long)]
    skip_remediation_check: bool,

    /// Classify but do not publish alerts
    #[arg(long)]
    no_output: bool,

    /// Serve the operator API on this address
    #[arg(long)]
    api_bind: Option<String>,
}

impl CommonArgs {
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;
        if let Some(secs) = self.window_secs {
            config.window.duration_secs = secs;
        }
        if let Some(url) = &self.remediation_url {
            config.remediation.base_url = Some(url.clone());
        }
        if self.skip_remediation_check {
            config.remediation.health_check = false;
        }
        if self.no_output {
            config.publish.enabled = false;
        }
        if let Some(bind) = &self.api_bind {
            config.api.bind = Some(bind.clone());
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run {
            common,
            brokers,
            input_topic,
            output_topic,
            remediation_topic,
            group_id,
            fresh,
        } => {
            let mut config = common.load()?;
            let kafka = &mut config.kafka;
            if let Some(v) = brokers {
                kafka.brokers = v;
            }
            if let Some(v) = input_topic {
                kafka.input_topic = v;
            }
            if let Some(v) = output_topic {
                kafka.output_topic = v;
            }
            if let Some(v) = remediation_topic {
                kafka.remediation_topic = v;
            }
            if let Some(v) = group_id {
                kafka.group_id = v;
            }
            kafka.fresh_group |= fresh;
            config.validate()?;

            tracing::info!(
                window_secs = config.window.duration_secs,
                remediation = config.remediation_enabled(),
                "starting logpulse"
            );
            logpulse::run(config).await?;
        }
        Commands::Replay { input, common } => {
            let config = common.load()?;
            config.validate()?;
            logpulse::replay(config, &input)
                .await
                .with_context(|| format!("replay of {} failed", input.display()))?;
        }
        Commands::CheckRemediation {
            url,
            timeout_secs,
            json,
        } => {
            let report =
                logpulse::check_remediation(&url, Duration::from_secs(timeout_secs)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let status = if report.healthy { "HEALTHY" } else { "UNREACHABLE" };
                println!("{:<12} | {}", "Service", report.url);
                println!("{:<12} | {}", "Status", status);
                if let Some(stats) = &report.stats {
                    println!("{:<12} | {}", "Documents", stats.total_documents);
                    println!(
                        "{:<12} | {}",
                        "Model",
                        stats.llm_model.as_deref().unwrap_or("unknown")
                    );
                }
            }
            if !report.healthy {
                anyhow::bail!("remediation lookup service at {url} is not healthy");
            }
        }
    }

    Ok(())
}
