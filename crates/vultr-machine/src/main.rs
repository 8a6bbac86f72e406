mod store;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vultr_driver::{DRIVER_OPTIONS, DriverConfig, Driver, OptionValues};

use crate::store::DriverRecord;

#[derive(Parser)]
#[command(name = "vultr-machine")]
#[command(about = "Provision and manage a Vultr VPS", long_about = None)]
struct Cli {
    /// Directory holding per-machine state and keys
    #[arg(short = 's', long, env = "MACHINE_STORAGE_PATH", default_value = ".machine")]
    storage_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the driver's options and their environment variables
    Options,
    /// Validate options and create a machine
    Create {
        name: String,
        /// Option override, e.g. `-o vultr-plan-id=202`. Repeatable.
        #[arg(short = 'o', long = "opt", value_parser = parse_opt)]
        opts: Vec<(String, String)>,
        /// Only run the pre-create checks
        #[arg(long)]
        check: bool,
    },
    /// Print the machine state
    State { name: String },
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Kill { name: String },
    /// Delete the machine and any resources it created
    Rm { name: String },
    /// Print the Docker daemon URL
    Url { name: String },
    /// Print the public IP address
    Ip { name: String },
    /// Print SSH connection details
    Ssh { name: String },
}

fn parse_opt(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let name = name.trim_start_matches("--");
    if vultr_driver::config::find_option(name).is_none() {
        return Err(format!("unknown option {name:?}"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let store = cli.storage_path;

    match cli.command {
        Commands::Options => {
            for opt in DRIVER_OPTIONS {
                let default = opt.default.unwrap_or("");
                println!("--{:<26} {:<26} [{}] {}", opt.name, opt.env_var, default, opt.usage);
            }
        }
        Commands::Create { name, opts, check } => {
            let mut values = OptionValues::from_env();
            for (opt, value) in opts {
                values = values.set(&opt, value);
            }
            let config = DriverConfig::from_options(&name, &store, &values)?;
            create(Driver::new(config), check).await?;
        }
        Commands::State { name } => {
            let driver = store::load(&store, &name)?.into_driver();
            println!("{}", driver.status().await);
        }
        Commands::Start { name } => store::load(&store, &name)?.into_driver().start().await?,
        Commands::Stop { name } => store::load(&store, &name)?.into_driver().stop().await?,
        Commands::Restart { name } => store::load(&store, &name)?.into_driver().restart().await?,
        Commands::Kill { name } => store::load(&store, &name)?.into_driver().kill().await?,
        Commands::Rm { name } => {
            let driver = store::load(&store, &name)?.into_driver();
            driver.remove().await?;
            store::forget(&store, &name)?;
            tracing::info!(machine = %name, "machine removed");
        }
        Commands::Url { name } => {
            let driver = store::load(&store, &name)?.into_driver();
            println!("{}", driver.get_url().await?);
        }
        Commands::Ip { name } => {
            let driver = store::load(&store, &name)?.into_driver();
            println!("{}", driver.get_ip()?);
        }
        Commands::Ssh { name } => {
            let driver = store::load(&store, &name)?.into_driver();
            println!("host: {}", driver.get_ssh_hostname()?);
            println!("port: {}", driver.get_ssh_port());
            println!("user: {}", driver.get_ssh_username());
            if let Some(key) = driver.ssh_key_path() {
                println!("key:  {}", key.display());
            }
        }
    }

    Ok(())
}

async fn create(mut driver: Driver, check_only: bool) -> Result<()> {
    driver.pre_create_check().await?;
    if check_only {
        println!("{}: options are valid", driver.config().machine_name);
        return Ok(());
    }

    let cancel = driver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, aborting");
            cancel.cancel();
        }
    });

    let result = driver.create().await;

    // Keep whatever was created so `rm` can clean it up after a failure.
    let machine = driver.machine();
    if machine.instance_id.is_some() || machine.ssh_key.is_some() || machine.script.is_some() {
        store::save(&DriverRecord::of(&driver))?;
    }
    result?;

    println!("{}", driver.get_ip()?);
    Ok(())
}
