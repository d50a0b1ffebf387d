//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
//------------------------------------------------------------------------------
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use log::{ error, info };
use structopt::StructOpt;
use tokio::sync::watch;

use modbus_slave_sim::settings::Settings;
use modbus_slave_sim::Simulator;

#[derive(Debug, StructOpt)]
#[structopt(name = "Modbus TCP slave simulator", about = "parameters")]
struct Opt {
	/// JSON document declaring the slaves
	#[structopt(parse(from_os_str), default_value="sample.json")]
	config: PathBuf,
	/// Address to listen on
	#[structopt(short, long, default_value="0.0.0.0")]
	bind: IpAddr,
	/// TCP port
	#[structopt(short, long, default_value="1502")]
	port: u16,
	/// Unit ids 1..=N are served
	#[structopt(short, long, default_value="20")]
	max_slaves: u8,
	/// Words per register bank
	#[structopt(short, long, default_value="2000")]
	capacity: usize,
	/// Seconds between checks of the document mtime
	#[structopt(short = "i", long, default_value="30")]
	poll_interval: u64,
	/// Seconds an idle connection is kept open
	#[structopt(short = "t", long, default_value="60")]
	read_timeout: u64,
	/// Reject write function codes
	#[structopt(long)]
	read_only: bool,
}

impl From<Opt> for Settings {
	fn from(opt: Opt) -> Settings {
		Settings {
			config_path:   opt.config,
			bind:          opt.bind,
			port:          opt.port,
			max_slaves:    opt.max_slaves,
			capacity:      opt.capacity,
			poll_interval: Duration::from_secs(opt.poll_interval),
			read_timeout:  Duration::from_secs(opt.read_timeout),
			read_only:     opt.read_only,
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init_from_env(
		env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
	);
	let opt = Opt::from_args();

	let simulator = Simulator::bind(opt.into()).await?;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				info!("Stopping Modbus TCP slave...");
				let _ = shutdown_tx.send(true);
			},
			Err(e) => {
				// Keep the sender alive, otherwise the loops read it as shutdown.
				error!("Cannot listen for termination signal: {}", e);
				std::future::pending::<()>().await;
			},
		}
	});

	simulator.run(shutdown_rx).await
}
