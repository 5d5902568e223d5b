//! `mender` command line: run simulated scenarios and inspect configuration

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mender_core::simulator::Scenario;
use mender_core::telemetry::{self, LogFormat};
use mender_core::{OrchestratorConfig, RunBudget};

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_name("PATH")
        .help("Orchestrator config file (.toml, .yaml or .yml)")
}

fn load_config(args: &ArgMatches) -> anyhow::Result<OrchestratorConfig> {
    match args.get_one::<String>("config") {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("failed to load config from {path}")),
        None => Ok(OrchestratorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("mender")
        .version(mender_core::VERSION)
        .about("Self-healing modification orchestrator")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted scenario through the orchestrator")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .short('s')
                        .default_value("happy-path")
                        .value_parser(Scenario::ALL.map(|s| s.name()))
                        .help("Scenario to run"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("recovery-attempts")
                        .long("recovery-attempts")
                        .value_parser(value_parser!(u32))
                        .help("Override the recovery attempt budget"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the decision as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg()),
        );

    let matches = cli.get_matches();
    let log_json = matches.get_flag("log-json")
        || matches
            .subcommand()
            .is_some_and(|(_, args)| args.get_flag("log-json"));
    let format = if log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    telemetry::init(format, "mender_core=info")
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let scenario: Scenario = args
                .get_one::<String>("scenario")
                .map_or(Ok(Scenario::HappyPath), |name| name.parse())
                .map_err(anyhow::Error::msg)?;
            let config = load_config(args)?;
            let mut budget = RunBudget::from_config(&config);
            if let Some(attempts) = args.get_one::<u32>("recovery-attempts") {
                budget = budget.with_recovery_attempts(*attempts);
            }

            let decision = scenario.simulate(config, budget).await?;

            if args.get_flag("json") {
                println!("{}", decision.to_json()?);
            } else {
                println!("Scenario: {scenario}");
                println!("Run: {}", decision.run_id);
                println!();
                for line in decision.trajectory.summaries() {
                    println!("  {line}");
                }
                println!();
                println!("Decision: {} ({})", decision.kind, decision.reason);
                if let Some(pattern) = decision.unresolved {
                    println!("Unresolved: {pattern}");
                }
            }

            std::process::exit(if decision.is_approved() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            config.validate()?;
            print!("{}", config.to_toml_string()?);
        }
        _ => {}
    }

    Ok(())
}
