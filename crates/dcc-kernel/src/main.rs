use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use dcc_kernel::metadata::ComponentMetadata;
use dcc_kernel::options::ContainerConfig;
use dcc_kernel::test_harness::{run_simulator, SimulatorConfig, TestHarness};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("dcc")
        .version(dcc_kernel::VERSION)
        .about("Dynamic component container")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Run the container churn simulator")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("requirements")
                        .long("requirements")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of handlers the simulated type requires"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("Create and dispose many auto-named instances")
                .arg(
                    Arg::new("instances")
                        .long("instances")
                        .default_value("10000")
                        .value_parser(value_parser!(usize))
                        .help("Number of instances to create"),
                ),
        )
        .subcommand(
            Command::new("describe")
                .about("Print the type description of a JSON component metadata file")
                .arg(Arg::new("path").required(true).help("Path to the metadata file"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let operations = args.get_one::<u64>("operations").copied().unwrap_or(10_000);
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
            let requirements = args.get_one::<usize>("requirements").copied().unwrap_or(3);
            let stop_on_violation = args.get_flag("stop-on-violation");

            println!("Running DCC Simulator...");
            println!("Operations: {operations}");
            println!("Seed: {seed}");
            println!();

            let config = SimulatorConfig {
                seed,
                total_operations: operations,
                requirements,
                stop_on_first_violation: stop_on_violation,
                ..Default::default()
            };

            let report = run_simulator(config);
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("stress", args)) => {
            let instances = args.get_one::<usize>("instances").copied().unwrap_or(10_000);

            println!("Running stress test...");
            println!();

            let report = TestHarness::run_stress_test(instances);

            println!("Stress Test Report:");
            println!("  Instances: {}", report.instances);
            println!("  Unique names: {}", report.unique_names);
            println!("  Leaked names: {}", report.leaked_names);
            println!("  Elapsed: {} ms", report.elapsed_ms);
            println!("  Success: {}", report.success);

            std::process::exit(if report.success { 0 } else { 1 });
        }
        Some(("describe", args)) => {
            let path = args
                .get_one::<String>("path")
                .context("missing metadata path")?;
            let raw = std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
            let metadata: ComponentMetadata =
                serde_json::from_str(&raw).with_context(|| format!("malformed metadata in {path}"))?;

            let description = TestHarness::describe(metadata, ContainerConfig::from_env())?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&description)?);
            } else {
                println!("Factory: {}", description.factory_name);
                println!("Class: {}", description.class_name);
                if let Some(version) = &description.version {
                    println!("Version: {version}");
                }
                println!("Required handlers:");
                for handler in &description.required_handlers {
                    println!("  {handler}");
                }
                for (key, value) in description.properties_to_publish() {
                    println!("{key} = {}", serde_json::to_string(&value)?);
                }
            }
        }
        _ => {}
    }

    Ok(())
}
