use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otg_gadget::config::{AppConfig, ConfigStore};
use otg_gadget::otg::{configfs, Action, UsbGadget};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// otg-gadget command line arguments
#[derive(Parser, Debug)]
#[command(name = "otg-gadget")]
#[command(version, about = "Declarative USB OTG gadget configuration", long_about = None)]
struct CliArgs {
    /// Data directory path (default: /etc/one-kvm)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile configfs with the stored configuration
    Apply {
        /// Print the planned actions without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Unbind and bind the controller so the host re-enumerates
    Rebind {
        /// Fail when the unbind write fails
        #[arg(long)]
        strict_unbind: bool,
    },
    /// Attach the controller to its driver
    Bind,
    /// Detach the controller from its driver
    Unbind,
    /// Show controller, binding and pending changes
    Status,
    /// Override one attribute of one gadget item and apply
    Override {
        item: String,
        attr: String,
        value: String,
    },
    /// Change and persist the enabled functions, then apply
    Devices {
        #[arg(long)]
        keyboard: Option<bool>,
        #[arg(long)]
        absolute_mouse: Option<bool>,
        #[arg(long)]
        relative_mouse: Option<bool>,
        #[arg(long)]
        mass_storage: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Determine data directory (CLI arg takes precedence)
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::debug!("Data directory: {}", data_dir.display());

    let config_store = ConfigStore::new(&data_dir.join("otg-gadget.db")).await?;

    match args.command {
        Command::Apply { dry_run } => {
            let gadget = gadget_from(&config_store.get());
            if dry_run {
                gadget.select_udc()?;
                print_plan(&gadget)?;
            } else {
                gadget.init()?;
            }
        }
        Command::Rebind { strict_unbind } => {
            let gadget = gadget_from(&config_store.get());
            gadget.select_udc()?;
            gadget.rebind_usb(!strict_unbind)?;
        }
        Command::Bind => {
            let gadget = gadget_from(&config_store.get());
            gadget.select_udc()?;
            gadget.bind_udc()?;
        }
        Command::Unbind => {
            let gadget = gadget_from(&config_store.get());
            gadget.select_udc()?;
            gadget.unbind_udc()?;
        }
        Command::Status => {
            let gadget = gadget_from(&config_store.get());
            let configfs_ok = configfs::is_configfs_available(&gadget.layout().configfs_path);
            println!("configfs: {}", if configfs_ok { "available" } else { "missing" });
            let udc = gadget.select_udc()?;
            println!("udc:      {}", udc);
            println!("bound:    {}", gadget.is_udc_bound()?);
            println!("state:    {}", gadget.get_usb_state());
            print_plan(&gadget)?;
        }
        Command::Override { item, attr, value } => {
            let gadget = gadget_from(&config_store.get());
            if gadget.override_gadget_config(&item, &attr, &value)? {
                gadget.init()?;
            } else {
                tracing::info!("{}.{} already set to {:?}", item, attr, value);
            }
        }
        Command::Devices {
            keyboard,
            absolute_mouse,
            relative_mouse,
            mass_storage,
        } => {
            config_store
                .update(|config| {
                    let devices = &mut config.devices;
                    devices.keyboard = keyboard.unwrap_or(devices.keyboard);
                    devices.absolute_mouse = absolute_mouse.unwrap_or(devices.absolute_mouse);
                    devices.relative_mouse = relative_mouse.unwrap_or(devices.relative_mouse);
                    devices.mass_storage = mass_storage.unwrap_or(devices.mass_storage);
                })
                .await?;

            let config = config_store.get();
            tracing::info!("Enabled devices: {:?}", config.devices);
            let gadget = Arc::new(gadget_from(&config));
            gadget.select_udc()?;
            gadget.clone().update_gadget_config_async().await?;
            if !gadget.wait_for_hid_devices(2000).await {
                tracing::warn!("HID device nodes did not appear");
            }
        }
    }

    Ok(())
}

fn gadget_from(config: &AppConfig) -> UsbGadget {
    UsbGadget::from_config(config)
}

fn print_plan(gadget: &UsbGadget) -> anyhow::Result<()> {
    let plan = gadget.plan_gadget_config()?;
    let pending: Vec<_> = plan
        .iter()
        .filter(|p| p.action != Action::DoNothing)
        .collect();
    let recheck = plan
        .iter()
        .filter(|p| p.action == Action::DoNothing && p.after_promoted)
        .count();
    println!("pending changes: {}", pending.len());
    for change in pending {
        println!("  {:<16} {}", change.action.to_string(), change.path.display());
    }
    if recheck > 0 {
        println!("  ({} more re-checked after conditional removals)", recheck);
    }
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "otg_gadget=error,sqlx=error",
        LogLevel::Warn => "otg_gadget=warn,sqlx=warn",
        LogLevel::Info => "otg_gadget=info,sqlx=warn",
        LogLevel::Verbose => "otg_gadget=debug,sqlx=warn",
        LogLevel::Debug => "otg_gadget=debug,sqlx=info",
        LogLevel::Trace => "otg_gadget=trace,sqlx=info",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("OTG_GADGET_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/one-kvm")
}
