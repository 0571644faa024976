//! `cia-agent` command line: traffic simulation and rule file checks

use anyhow::{bail, Context, Result};
use cia_agent::simulator::{run_simulator, SimulatorConfig};
use cia_agent::{AgentConfig, ChaosTarget};
use cia_rules::{InterventionRule, RuleStore};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("cia-agent")
        .version(cia_agent::VERSION)
        .about("Causal intervention agent: traffic shaping and chaos injection")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Drive the agent with synthetic page traffic")
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("1000")
                        .value_parser(value_parser!(usize))
                        .help("Number of requests to issue"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("intensity")
                        .long("intensity")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Chaos intensity in [0, 1]; 0 disables chaos"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .default_value("api")
                        .value_parser(["api", "assets"])
                        .help("Traffic class chaos applies to"),
                )
                .arg(
                    Arg::new("rules")
                        .long("rules")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file holding an array of intervention rules"),
                )
                .arg(
                    Arg::new("prefetch")
                        .long("prefetch")
                        .action(ArgAction::Append)
                        .help("URL to hint for prefetch before traffic starts"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML agent configuration"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("rules").about("Rule file utilities").subcommand(
                Command::new("check")
                    .about("Validate a rule file")
                    .arg(
                        Arg::new("file")
                            .required(true)
                            .value_parser(value_parser!(PathBuf))
                            .help("JSON file holding an array of intervention rules"),
                    ),
            ),
        );

    match cli.get_matches().subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("rules", args)) => match args.subcommand() {
            Some(("check", args)) => check_rules(args),
            _ => bail!("missing rules subcommand"),
        },
        _ => Ok(()),
    }
}

async fn simulate(args: &ArgMatches) -> Result<()> {
    let agent = match args.get_one::<PathBuf>("config") {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            AgentConfig::from_toml_str(&raw)?
        }
        None => AgentConfig::default(),
    };
    let rules = match args.get_one::<PathBuf>("rules") {
        Some(path) => load_rules(path)?,
        None => Vec::new(),
    };
    let target = match args.get_one::<String>("target").map(String::as_str) {
        Some("assets") => ChaosTarget::Assets,
        _ => ChaosTarget::Api,
    };

    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        requests: args.get_one::<usize>("requests").copied().unwrap_or(1_000),
        intensity: args.get_one::<f64>("intensity").copied().unwrap_or(0.1),
        target,
        rules,
        prefetch: args
            .get_many::<String>("prefetch")
            .map(|urls| urls.cloned().collect())
            .unwrap_or_default(),
        agent,
    };

    tracing::info!(
        seed = config.seed,
        requests = config.requests,
        intensity = config.intensity,
        rules = config.rules.len(),
        "running simulator"
    );
    let report = run_simulator(config).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }

    if !report.passed() {
        bail!("{} violation(s)", report.violations.len());
    }
    Ok(())
}

fn check_rules(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("file")
        .context("missing rule file")?;
    let rules = load_rules(path)?;
    let count = RuleStore::new().replace(rules)?;
    println!("{}: {count} rule(s) OK", path.display());
    Ok(())
}

fn load_rules(path: &PathBuf) -> Result<Vec<InterventionRule>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing rules in {}", path.display()))
}
