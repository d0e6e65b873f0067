use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use netheal_core::NetHealConfig;

mod commands;
mod logging;

use logging::LogFormat;

const DEFAULT_CONFIG: &str = "netheal.toml";

fn cli() -> Command {
    Command::new("netheal")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Closed-loop network fault triage and remediation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: ./netheal.toml when present)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding inputs, reports and logs"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .value_name("LEVEL")
                .help("Log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Console log format"),
        )
        .subcommand(
            Command::new("run")
                .about("Triage and remediate every active alarm")
                .arg(
                    Arg::new("attempt-bound")
                        .long("attempt-bound")
                        .value_name("N")
                        .value_parser(value_parser!(u32).range(1..))
                        .help("Remediation attempts before an alarm escalates"),
                )
                .arg(
                    Arg::new("no-confirm")
                        .long("no-confirm")
                        .action(ArgAction::SetTrue)
                        .help("Apply remediation plans without asking"),
                )
                .arg(
                    Arg::new("alarms")
                        .long("alarms")
                        .value_name("FILE")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Extra alarm file to merge at intake (repeatable)"),
                ),
        )
        .subcommand(Command::new("labcheck").about("Probe every registered device once"))
        .subcommand(Command::new("registry").about("List registered devices"))
}

fn load_config(matches: &ArgMatches) -> Result<NetHealConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => NetHealConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => NetHealConfig::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("loading configuration from {DEFAULT_CONFIG}"))?,
        None => NetHealConfig::default(),
    };
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.with_data_dir(dir.clone());
    }
    Ok(config)
}

fn apply_run_overrides(mut config: NetHealConfig, matches: &ArgMatches) -> NetHealConfig {
    if let Some(bound) = matches.get_one::<u32>("attempt-bound") {
        config = config.with_attempt_bound(*bound);
    }
    if matches.get_flag("no-confirm") {
        config = config.with_human_in_the_loop(false);
    }
    if let Some(files) = matches.get_many::<PathBuf>("alarms") {
        for file in files {
            config = config.with_alarm_file(file.clone());
        }
    }
    config
}

async fn dispatch(matches: ArgMatches) -> Result<i32> {
    let config = load_config(&matches)?;
    let format = matches
        .get_one::<String>("log-format")
        .and_then(|f| LogFormat::parse(f))
        .unwrap_or(LogFormat::Text);
    let level = matches.get_one::<String>("log-level").map(String::as_str);
    logging::init(level, format, &config.debug_log_path());

    match matches.subcommand() {
        Some(("run", sub)) => commands::run(apply_run_overrides(config, sub)).await,
        Some(("labcheck", _)) => commands::labcheck(&config).await,
        Some(("registry", _)) => commands::registry(&config),
        _ => unreachable!("subcommand is required"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match dispatch(cli().get_matches()).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
