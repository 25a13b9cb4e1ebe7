//! Balance ledger command-line client

use balance_ledger::telemetry::init_tracing;
use balance_ledger::{DecimalLedger, LedgerConfig};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "balance-ledger", about = "Inspect and adjust a decimal balance ledger")]
struct Cli {
    /// Ledger table name
    #[arg(short, long, default_value = "balances")]
    table: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the balance stored for a key
    Get { key: Uuid },
    /// Overwrite the balance for a key
    Set { key: Uuid, amount: Decimal },
    /// Add to the balance for a key
    Add { key: Uuid, amount: Decimal },
    /// Take from the balance for a key if it is sufficient
    Take { key: Uuid, amount: Decimal },
    /// Print the sum of all balances
    Total,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = LedgerConfig::load()?;
    config.validate()?;
    init_tracing(&config.logging)?;

    let ledger = DecimalLedger::connect(&config, &cli.table).await?;

    match cli.command {
        Command::Get { key } => match ledger.get(key).await? {
            Some(value) => println!("{}", value),
            None => println!("absent"),
        },
        Command::Set { key, amount } => {
            ledger.set(key, amount).await?;
            println!("{} = {}", key, amount);
        }
        Command::Add { key, amount } => {
            ledger.add(key, amount).await?;
            println!("{} += {}", key, amount);
        }
        Command::Take { key, amount } => {
            if ledger.take(key, amount).await? {
                println!("{} -= {}", key, amount);
            } else {
                println!("declined: insufficient balance");
                std::process::exit(2);
            }
        }
        Command::Total => println!("{}", ledger.total().await?),
    }

    Ok(())
}
