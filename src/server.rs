//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Server structure: accept loop and per-connection framing
//------------------------------------------------------------------------------
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{ debug, error, info, warn };
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::net::{ TcpListener, TcpStream };
use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::FrameError;
use crate::settings::Settings;
use crate::store::SlaveStore;

pub mod formal;
use crate::server::formal::{ MbapHeader, MBAP_HEADER_LEN };

mod process;

pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
	*shutdown.borrow()
}

pub struct Server {
	store:        Arc<SlaveStore>,
	max_slaves:   u8,
	read_only:    bool,
	read_timeout: Duration,
}

impl Server {
	pub fn new(store: Arc<SlaveStore>, settings: &Settings) -> Server {
		Server {
			store,
			max_slaves:   settings.max_slaves,
			read_only:    settings.read_only,
			read_timeout: settings.read_timeout,
		}
	}

	/// Accepts connections until `shutdown` turns true. Every connection is
	/// served by its own task.
	pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
		loop {
			if shutdown_requested(&shutdown) { break; }
			tokio::select! {
				accepted = listener.accept() => match accepted {
					Ok((stream, peer)) => {
						let server = Arc::clone(&self);
						let shutdown = shutdown.clone();
						tokio::spawn(async move { server.serve_client(stream, peer, shutdown).await });
					},
					Err(e) => error!("Failed to accept connection: {}", e),
				},
				changed = shutdown.changed() => {
					if changed.is_err() { break; }
				},
			}
		}
		info!("Server stopped accepting connections");
	}

	async fn serve_client(&self, mut stream: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
		info!("Client {} connected", peer);
		if let Err(e) = stream.set_nodelay(true) {
			debug!("set_nodelay on {}: {}", peer, e);
		}
		match self.handle_connection(&mut stream, shutdown).await {
			Ok(()) => debug!("Client {} closed the connection", peer),
			Err(FrameError::Io(e)) => warn!("Client {}: {}", peer, e),
			Err(e) => warn!("Client {} dropped: {}", peer, e),
		}
		info!("Client {} disconnected", peer);
	}

	// AwaitHeader -> AwaitBody -> Dispatch -> Respond, until the peer leaves
	// or shutdown is requested between two requests.
	async fn handle_connection(&self, stream: &mut TcpStream, mut shutdown: watch::Receiver<bool>) -> Result<(), FrameError> {
		let mut raw = [0u8; MBAP_HEADER_LEN];
		loop {
			if shutdown_requested(&shutdown) { return Ok(()); }
			// Only the first byte races shutdown: `read` is cancel-safe, `read_exact` is not.
			tokio::select! {
				read = timeout(self.read_timeout, stream.read(&mut raw[..1])) => match read {
					Err(_) => return Err(FrameError::Timeout),
					Ok(Ok(0)) => return Ok(()),
					Ok(Err(e)) => return Err(e.into()),
					Ok(Ok(_)) => {},
				},
				changed = shutdown.changed() => {
					if changed.is_err() { return Ok(()); }
					continue;
				},
			}
			match timeout(self.read_timeout, stream.read_exact(&mut raw[1..])).await {
				Err(_) => return Err(FrameError::Timeout),
				Ok(res) => { res?; },
			}

			let header = MbapHeader::parse(&raw);
			if header.protocol_id != 0 {
				return Err(FrameError::BadProtocolId(header.protocol_id));
			}
			let pdu_len = header.pdu_len().ok_or(FrameError::BadLength(header.length))?;

			let mut pdu = vec![0u8; pdu_len];
			match timeout(self.read_timeout, stream.read_exact(&mut pdu)).await {
				Err(_) => return Err(FrameError::Timeout),
				Ok(res) => { res?; },
			}

			let response = self.process(header.unit_id, &pdu);
			let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + response.len());
			header.reply(response.len()).encode(&mut frame);
			frame.extend_from_slice(&response);
			stream.write_all(&frame).await?;
		}
	}
}
