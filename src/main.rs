use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use pharmacy_stock::files;
use pharmacy_stock::{Job, ReorderInputs, RunSummary, Settings, Worker};
use std::path::{Path, PathBuf};

pub fn make_app() -> Command {
    Command::new("pharmacy-stock")
        .about("Aggregates pharmacy stock extracts and builds the inventory calculation sheet")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("YAML settings file (defaults to $PHARMACY_CONFIG)"),
        )
        .arg(
            Arg::new("as-of")
                .long("as-of")
                .global(true)
                .help("Run date for the pending order window, YYYY-MM-DD (defaults to today)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print run summaries as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("global-stock")
                .about("Sum stock per item across all locations")
                .arg(path_arg("input"))
                .arg(path_arg("output")),
        )
        .subcommand(
            Command::new("main-store")
                .about("Roll main store batch stock up to items")
                .arg(path_arg("input"))
                .arg(path_arg("output")),
        )
        .subcommand(
            Command::new("reorder")
                .about("Build the inventory calculation sheet")
                .arg(path_arg("catalog"))
                .arg(path_arg("global-stock"))
                .arg(path_arg("main-store"))
                .arg(path_arg("pending"))
                .arg(path_arg("output")),
        )
        .subcommand(
            Command::new("all")
                .about("Run all three steps in order, stopping at the first failure")
                .arg(path_arg("dir").help("Directory holding inputs and outputs")),
        )
}

fn path_arg(name: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_parser(value_parser!(PathBuf))
}

fn main() {
    // Load .env file if present (for local configuration)
    // Silently ignore if .env file doesn't exist
    let _ = dotenvy::dotenv();

    let matches = make_app().get_matches();
    init_logging(&matches);

    if let Err(e) = handle_run(&matches) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(matches: &ArgMatches) {
    let default_filter = if matches.get_flag("quiet") {
        "error"
    } else if matches.get_flag("verbose") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn handle_run(matches: &ArgMatches) -> Result<()> {
    let settings = load_settings(matches)?;
    let as_of = match matches.get_one::<String>("as-of") {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("Invalid --as-of date '{}'", text))?,
        None => Local::now().date_naive(),
    };
    let json = matches.get_flag("json");

    let jobs = match matches.subcommand() {
        Some(("global-stock", sub)) => vec![Job::GlobalStock {
            input: resolve_path(
                sub.get_one("input"),
                "PHARMACY_GLOBAL_STOCK_REPORT",
                files::GLOBAL_STOCK_REPORT,
                None,
            )?,
            output: resolve_path(
                sub.get_one("output"),
                "PHARMACY_GLOBAL_STOCK_LOOKUP",
                files::GLOBAL_STOCK_LOOKUP,
                None,
            )?,
        }],
        Some(("main-store", sub)) => vec![Job::MainStore {
            input: resolve_path(
                sub.get_one("input"),
                "PHARMACY_MAIN_STORE_REPORT",
                files::MAIN_STORE_REPORT,
                None,
            )?,
            output: resolve_path(
                sub.get_one("output"),
                "PHARMACY_MAIN_STORE_LOOKUP",
                files::MAIN_STORE_LOOKUP,
                None,
            )?,
        }],
        Some(("reorder", sub)) => vec![reorder_job(Some(sub), None)?],
        Some(("all", sub)) => {
            let dir = sub.get_one::<PathBuf>("dir").map(PathBuf::as_path);
            vec![
                Job::GlobalStock {
                    input: resolve_path(
                        None,
                        "PHARMACY_GLOBAL_STOCK_REPORT",
                        files::GLOBAL_STOCK_REPORT,
                        dir,
                    )?,
                    output: resolve_path(
                        None,
                        "PHARMACY_GLOBAL_STOCK_LOOKUP",
                        files::GLOBAL_STOCK_LOOKUP,
                        dir,
                    )?,
                },
                Job::MainStore {
                    input: resolve_path(
                        None,
                        "PHARMACY_MAIN_STORE_REPORT",
                        files::MAIN_STORE_REPORT,
                        dir,
                    )?,
                    output: resolve_path(
                        None,
                        "PHARMACY_MAIN_STORE_LOOKUP",
                        files::MAIN_STORE_LOOKUP,
                        dir,
                    )?,
                },
                reorder_job(None, dir)?,
            ]
        }
        _ => return Err(anyhow!("No command given, see --help")),
    };

    let worker = Worker::spawn(settings);
    for job in jobs {
        worker
            .submit(job, as_of)
            .map_err(|_| anyhow!("Worker thread is not running"))?;
        let result = worker
            .wait(|kind, message| log::debug!("[{}] {}", kind, message))
            .ok_or_else(|| anyhow!("Worker thread stopped unexpectedly"))?;
        match result {
            Ok(summary) => print_summary(&summary, json)?,
            Err(failure) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&failure)?);
                }
                worker.shutdown();
                return Err(failure.into());
            }
        }
    }
    worker.shutdown();
    Ok(())
}

fn reorder_job(sub: Option<&ArgMatches>, dir: Option<&Path>) -> Result<Job> {
    let flag = |name: &str| sub.and_then(|m| m.get_one::<PathBuf>(name));
    Ok(Job::Reorder {
        inputs: ReorderInputs {
            catalog: resolve_path(
                flag("catalog"),
                "PHARMACY_MASTER_DATA",
                files::MASTER_DATA,
                dir,
            )?,
            global_stock: resolve_path(
                flag("global-stock"),
                "PHARMACY_GLOBAL_STOCK_LOOKUP",
                files::GLOBAL_STOCK_LOOKUP,
                dir,
            )?,
            main_store_stock: resolve_path(
                flag("main-store"),
                "PHARMACY_MAIN_STORE_LOOKUP",
                files::MAIN_STORE_LOOKUP,
                dir,
            )?,
            pending_orders: resolve_path(
                flag("pending"),
                "PHARMACY_EXPECTED_ITEMS",
                files::EXPECTED_ITEMS,
                dir,
            )?,
        },
        output: resolve_path(
            flag("output"),
            "PHARMACY_INVENTORY_CALCULATION",
            files::INVENTORY_CALCULATION,
            dir,
        )?,
    })
}

fn load_settings(matches: &ArgMatches) -> Result<Settings> {
    let path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .or_else(|| std::env::var_os("PHARMACY_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => Settings::load(&expand_home(&path)?),
        None => Ok(Settings::default()),
    }
}

/// Flag value, then environment variable, then the conventional file name
/// (inside `dir` when given).
fn resolve_path(
    flag: Option<&PathBuf>,
    env_var: &str,
    default_name: &str,
    dir: Option<&Path>,
) -> Result<PathBuf> {
    let path = flag
        .cloned()
        .or_else(|| std::env::var_os(env_var).map(PathBuf::from))
        .unwrap_or_else(|| match dir {
            Some(dir) => dir.join(default_name),
            None => PathBuf::from(default_name),
        });
    expand_home(&path)
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(stripped) => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow!("Cannot expand ~ - HOME environment variable not set"))?;
            Ok(Path::new(&home).join(stripped))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{}", "=".repeat(55));
    println!("{}", summary);
    println!("{}", "=".repeat(55));
    if !summary.warnings.is_empty() && !log::log_enabled!(log::Level::Warn) {
        eprintln!("{} warnings suppressed by --quiet", summary.warnings.len());
    }
    Ok(())
}
