use clap::{CommandFactory, Parser, Subcommand};
use nagger::config::Config;
use nagger::{db, logging, runtime};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_ABOUT: &str = concat!(
    "\x1b[1mNagger v",
    env!("CARGO_PKG_VERSION"),
    "\x1b[22m\n",
    "Daily Telegram reminders for your short-lived tasks.\n",
    "\n",
    "\x1b[1mQuick Start:\x1b[22m\n",
    "  1) export TELEGRAM_BOT_TOKEN=...\n",
    "  2) nagger check\n",
    "  3) nagger start",
);

#[derive(Debug, Parser)]
#[command(name = "nagger", version = VERSION, about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the bot, the reminder scheduler and the retention sweeper
    Start,
    /// Load and validate configuration, then print the effective settings
    Check,
    /// Print version
    Version,
}

fn print_version() {
    println!("nagger {VERSION}");
}

fn print_check(config: &Config) -> anyhow::Result<()> {
    let defaults = config.reminder_defaults()?;
    match Config::resolve_config_path()? {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: none (defaults + environment)"),
    }
    println!("Data dir: {}", config.data_dir);
    println!(
        "Default reminder: {} {}",
        defaults.reminder_time,
        defaults.timezone.name()
    );
    println!(
        "Message TTL: {}h, cleanup every {} min",
        config.message_ttl_hours, config.cleanup_interval_mins
    );
    println!("Notify timeout: {}s", config.notify_timeout_secs);
    println!("Config OK");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(MainCommand::Start) => {}
        Some(MainCommand::Check) => {
            let config = Config::load()?;
            return print_check(&config);
        }
        Some(MainCommand::Version) => {
            print_version();
            return Ok(());
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        }
    }

    let config = Config::load()?;

    if std::env::var("NAGGER_LOG_TO_FILE").is_ok() {
        logging::init_logging(&config.data_dir, config.log_retention_days)?;
    } else {
        logging::init_console_logging();
    }
    info!("Starting Nagger bot...");

    let db = db::Database::new(&config.data_dir)?;
    info!("Database initialized at {}", config.data_dir);

    runtime::run(config, db).await?;

    Ok(())
}
