//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Hot reload of the slave document
//------------------------------------------------------------------------------
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{ Duration, SystemTime };

use log::{ debug, error, info };
use tokio::sync::watch;

use crate::config::ConfigLoader;
use crate::error::ConfigError;
use crate::server::shutdown_requested;
use crate::store::SlaveStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
	Unchanged,
	Reloaded { slaves: usize, applied: usize, skipped: usize },
}

/// Polls the document mtime and publishes a new generation when it moves
/// past the last successfully applied one. A failed load leaves the applied
/// mtime alone, so the document is retried on every poll until it loads.
pub struct ReloadWatcher {
	path:     PathBuf,
	loader:   ConfigLoader,
	store:    Arc<SlaveStore>,
	interval: Duration,
	applied:  Option<SystemTime>,
}

impl ReloadWatcher {
	pub fn new(path: PathBuf, loader: ConfigLoader, store: Arc<SlaveStore>, interval: Duration) -> ReloadWatcher {
		ReloadWatcher { path, loader, store, interval, applied: None }
	}

	pub fn applied(&self) -> Option<SystemTime> {
		self.applied
	}

	pub async fn check(&mut self) -> Result<ReloadStatus, ConfigError> {
		// Sampled before reading, so an edit racing with the read is seen next poll.
		let mtime = tokio::fs::metadata(&self.path).await?.modified()?;
		if self.applied.map_or(false, |applied| mtime <= applied) {
			return Ok(ReloadStatus::Unchanged);
		}

		info!("{} changed, reloading", self.path.display());
		let report = self.loader.load_file(&self.path).await?;
		let status = ReloadStatus::Reloaded {
			slaves:  report.slaves,
			applied: report.applied,
			skipped: report.skipped,
		};
		self.store.replace(report.generation);
		self.applied = Some(mtime);
		Ok(status)
	}

	pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
		loop {
			if shutdown_requested(&shutdown) { break; }
			tokio::select! {
				_ = tokio::time::sleep(self.interval) => {},
				changed = shutdown.changed() => {
					if changed.is_err() || shutdown_requested(&shutdown) { break; }
					continue;
				},
			}

			match self.check().await {
				Ok(ReloadStatus::Unchanged) => debug!("{} unchanged", self.path.display()),
				Ok(ReloadStatus::Reloaded { .. }) => info!("{} hot-reloaded", self.path.display()),
				Err(e) => error!("Reload of {} failed, keeping previous configuration: {}", self.path.display(), e),
			}
		}
		debug!("Reload watcher stopped");
	}
}
