//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Runtime settings
//------------------------------------------------------------------------------
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

/// Highest unit identifier a Modbus slave may use.
pub const MAX_UNIT_ID: u8 = 247;
/// Register addresses are 16-bit on the wire.
pub const MAX_CAPACITY: usize = 0x1_0000;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	pub config_path:   PathBuf,
	pub bind:          IpAddr,
	pub port:          u16,
	/// Unit ids `1..=max_slaves` are served.
	pub max_slaves:    u8,
	/// Words per bank.
	pub capacity:      usize,
	pub poll_interval: Duration,
	/// Idle connections are dropped after this long without a request.
	pub read_timeout:  Duration,
	/// Answer write function codes with "illegal function".
	pub read_only:     bool,
}

impl Default for Settings {
	fn default() -> Self {
		Settings {
			config_path:   PathBuf::from("sample.json"),
			bind:          IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			port:          1502,
			max_slaves:    20,
			capacity:      2000,
			poll_interval: Duration::from_secs(30),
			read_timeout:  Duration::from_secs(60),
			read_only:     false,
		}
	}
}

impl Settings {
	pub fn listen_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind, self.port)
	}

	/// Clamps values that the protocol cannot address.
	pub fn normalized(mut self) -> Settings {
		let max_slaves = self.max_slaves.max(1).min(MAX_UNIT_ID);
		if max_slaves != self.max_slaves {
			warn!("max slaves {} clamped to {}", self.max_slaves, max_slaves);
			self.max_slaves = max_slaves;
		}
		let capacity = self.capacity.max(1).min(MAX_CAPACITY);
		if capacity != self.capacity {
			warn!("bank capacity {} clamped to {}", self.capacity, capacity);
			self.capacity = capacity;
		}
		if self.poll_interval == Duration::from_secs(0) {
			warn!("poll interval of zero raised to 1s");
			self.poll_interval = Duration::from_secs(1);
		}
		self
	}
}
