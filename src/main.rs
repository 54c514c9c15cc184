use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;

use vmtop::aggregate::Aggregator;
use vmtop::api::HttpApi;
use vmtop::collector::Collector;
use vmtop::config::{self, Args};
use vmtop::report;

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging with default filter level of "info"; everything but
    // the reports themselves goes to stderr.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let defaults = config::load_defaults()?;
    let connection = config::resolve(&args, &defaults)?;
    let password = match connection.password {
        Some(password) => password,
        None => rpassword::prompt_password(format!(
            "Password for {} at {}: ",
            connection.username, connection.hostname
        ))
        .wrap_err("failed to read password")?,
    };

    info!(
        "Connecting to {} as {}",
        connection.hostname, connection.username
    );
    let api = HttpApi::connect(
        &connection.hostname,
        &connection.username,
        &password,
        args.insecure,
    )
    .wrap_err_with(|| format!("failed to authenticate against {}", connection.hostname))?;

    let mut collector = Collector::new(
        &api,
        args.timeframe,
        args.aggregation,
        &args.patterns,
        args.only_storage.as_deref(),
    )?;
    let now = chrono::Utc::now().timestamp();
    let machines = collector.collect(now)?;
    info!("Collected samples for {} machines", machines.len());

    let mut aggregator = Aggregator::new();
    let stats = aggregator.aggregate_all(&machines);

    let output = report::render_report(&stats, aggregator.ledger(), args.aggregation, args.top);
    println!("{}", output);

    Ok(())
}
