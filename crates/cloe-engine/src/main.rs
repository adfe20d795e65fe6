use clap::{value_parser, Arg, Command};
use cloe_engine::harness::{run_simulation, SimulationConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Command::new("cloe-engine")
        .version(cloe_engine::VERSION)
        .about("CLOE closed-loop optimization engine")
        .subcommand(
            Command::new("simulate")
                .about("Run the engine end to end against a simulated element")
                .arg(
                    Arg::new("decisions")
                        .long("decisions")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Number of decisions to submit"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("degrade-every")
                        .long("degrade-every")
                        .value_parser(value_parser!(u64))
                        .help("Degrade radio conditions on every n-th decision"),
                ),
        );

    let matches = cli.get_matches();
    match matches.subcommand() {
        Some(("simulate", sub)) => {
            let config = SimulationConfig {
                decisions: *sub.get_one::<u64>("decisions").unwrap_or(&20),
                seed: *sub.get_one::<u64>("seed").unwrap_or(&42),
                degrade_every: sub.get_one::<u64>("degrade-every").copied(),
            };
            let report = run_simulation(config).await;
            println!("{}", report.generate_text());
            if !report.drained() {
                anyhow::bail!("simulation left executions in flight");
            }
        }
        _ => {
            println!("No subcommand given; try `cloe-engine simulate --decisions 20`");
        }
    }
    Ok(())
}
