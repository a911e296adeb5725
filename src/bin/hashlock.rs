// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

use std::path::PathBuf;
use std::str::FromStr;

use bitcoin::util::address::Address;
use bitcoin::Txid;
use clap::Parser;
use log::LevelFilter;

use hashlock_core::address;
use hashlock_core::config::Config;
use hashlock_core::consensus;
use hashlock_core::script::Branch;
use hashlock_core::service::{CounterpartyClient, EsploraClient};
use hashlock_core::swap::{Htlc, SpendRequest};
use hashlock_core::Error;

/// Hash-time-locked contracts on Bitcoin P2SH.
///
/// Derives the contract address to fund, spends it through the claim branch with the secret or
/// through the refund branch once the timelock matured, and recovers the secret revealed by a
/// claim.
#[derive(Parser, Debug)]
#[clap(version = option_env ! ("CARGO_PKG_VERSION").unwrap_or("unknown"),
author = option_env ! ("CARGO_PKG_AUTHORS").unwrap_or(""))]
struct Cli {
    /// Path to the TOML configuration file
    #[clap(long, short = 'c', default_value = "hashlock.toml")]
    config: PathBuf,

    /// Sets the verbosity level of the logs
    #[clap(long, short = 'v', possible_values = &["off", "error", "warn", "info", "debug", "trace"], default_value = "info")]
    verbosity: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Print the contract address and the locking script
    Address,
    /// Spend with the secret, as the payee
    Claim {
        /// Address receiving the funds
        #[clap(long, short = 'd')]
        destination: String,
        /// Print the finalized transaction without broadcasting it
        #[clap(long)]
        dry_run: bool,
    },
    /// Spend after the timelock matured, as the payer
    Refund {
        /// Address receiving the funds
        #[clap(long, short = 'd')]
        destination: String,
        /// Print the finalized transaction without broadcasting it
        #[clap(long)]
        dry_run: bool,
    },
    /// Recover the secret revealed by a claim transaction
    Secret {
        /// Claim transaction id
        #[clap(long, short = 't')]
        txid: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    env_logger::Builder::new()
        .filter_level(LevelFilter::from_str(&args.verbosity).unwrap_or(LevelFilter::Info))
        .init();

    if let Err(e) = run(args).await {
        log::error!("{} ({})", e, e.category());
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<(), Error> {
    let config = Config::from_file(&args.config)?;
    let htlc = Htlc::new(config.htlc_params()?, config.network)?;
    log::debug!("Loaded contract {:?}", htlc.params());

    match args.command {
        Commands::Address => {
            println!("Shared address: {}", htlc.address());
            println!("Locking script: {}", hex::encode(htlc.script().to_bytes()));
            Ok(())
        }
        Commands::Claim {
            destination,
            dry_run,
        } => spend(&config, &htlc, Branch::Claim, &destination, dry_run).await,
        Commands::Refund {
            destination,
            dry_run,
        } => spend(&config, &htlc, Branch::Refund, &destination, dry_run).await,
        Commands::Secret { txid } => {
            let txid = Txid::from_str(&txid).map_err(consensus::Error::new)?;
            let esplora = EsploraClient::new(config.esplora_url());
            let secret = htlc
                .discover_secret(&txid, &esplora, &config.retry_policy())
                .await?;
            match std::str::from_utf8(secret.as_bytes()) {
                Ok(s) => println!("The preimage is: {}", s),
                Err(_) => println!("The preimage is: 0x{}", hex::encode(secret.as_bytes())),
            }
            Ok(())
        }
    }
}

async fn spend(
    config: &Config,
    htlc: &Htlc,
    branch: Branch,
    destination: &str,
    dry_run: bool,
) -> Result<(), Error> {
    let destination = Address::from_str(destination).map_err(consensus::Error::new)?;
    if !address::on_network(&destination, htlc.network()) {
        return Err(
            consensus::Error::ParseFailed("Destination address is for another network").into(),
        );
    }
    let request = SpendRequest {
        branch,
        identity: config.identity()?,
        secret: config.secret(),
        destination,
        mode: config.payment.clone(),
        sequence: None,
    };
    let provider = CounterpartyClient::new(
        &config.counterparty.url,
        &config.counterparty.user,
        &config.counterparty.password,
    );
    let esplora = EsploraClient::new(config.esplora_url());
    let policy = config.retry_policy();

    log::info!("Spending {} through the {} branch", htlc.address(), branch);
    let spend = htlc.prepare(&request, &provider, &esplora, &policy).await?;
    log::info!("Finalized transaction {}", spend.txid());

    if dry_run {
        println!("{}", spend.to_hex());
        return Ok(());
    }
    let txid = htlc.broadcast(&spend, &esplora, &policy).await?;
    println!("Transaction broadcast: {}", txid);
    Ok(())
}
