//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Virtual slaves declared in a JSON document, reloaded while serving
//------------------------------------------------------------------------------
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use log::{ error, info };
use tokio::net::TcpListener;
use tokio::sync::watch;

extern crate num;
#[macro_use]
extern crate num_derive;

pub mod config;
pub mod error;
pub mod registers;
pub mod server;
pub mod settings;
pub mod store;
pub mod watcher;

use crate::config::ConfigLoader;
use crate::server::Server;
use crate::settings::Settings;
use crate::store::SlaveStore;
use crate::watcher::ReloadWatcher;

/// Bound listener plus the initial generation, ready to serve.
pub struct Simulator {
	settings: Settings,
	store:    Arc<SlaveStore>,
	watcher:  ReloadWatcher,
	listener: TcpListener,
}

impl Simulator {
	/// Loads the document once and binds the listening socket. Only a bind
	/// failure is fatal; a document that does not load is retried by the watcher.
	pub async fn bind(settings: Settings) -> anyhow::Result<Simulator> {
		let settings = settings.normalized();
		let loader = ConfigLoader::from_settings(&settings);
		let store = Arc::new(SlaveStore::new(loader.empty_generation()));
		let mut watcher = ReloadWatcher::new(
			settings.config_path.clone(), loader, Arc::clone(&store), settings.poll_interval);

		if let Err(e) = watcher.check().await {
			error!("Initial load of {} failed, serving empty slaves until it loads: {}",
				settings.config_path.display(), e);
		}

		let addr = settings.listen_addr();
		let listener = TcpListener::bind(addr).await
			.with_context(|| format!("cannot bind Modbus TCP listener to {}", addr))?;
		info!("Modbus TCP slave listening on {} (units 1..={}, {} words per bank)",
			listener.local_addr()?, settings.max_slaves, settings.capacity);

		Ok(Simulator { settings, store, watcher, listener })
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	pub fn store(&self) -> Arc<SlaveStore> {
		Arc::clone(&self.store)
	}

	/// Serves until `shutdown` turns true, then waits for the watcher to stop.
	pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
		let watcher = tokio::spawn(self.watcher.run(shutdown.clone()));
		let server = Arc::new(Server::new(self.store, &self.settings));
		server.run(self.listener, shutdown).await;
		watcher.await.context("reload watcher task failed")?;
		Ok(())
	}
}
