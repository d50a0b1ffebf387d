//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Loading of the JSON slave document into a register generation
//------------------------------------------------------------------------------
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::path::Path;

use log::{ debug, info, warn };
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ ConfigError, DeclarationError };
use crate::registers::{ compile, Outcome, RegisterDeclaration };
use crate::settings::Settings;
use crate::store::{ Generation, SlaveBanks };

// Slave-level layout is strict; register entries are parsed one by one later.
#[derive(Debug, Deserialize)]
struct SlaveEntry {
	#[serde(default)]
	id: Option<Value>,
	#[serde(default)]
	registers: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlaveDeclaration {
	/// `(declared id or array position) + 1`, not yet checked against the unit range.
	/// `None` when the declared id is not an integer.
	pub slave_id:  Option<i64>,
	pub registers: Vec<Result<RegisterDeclaration, DeclarationError>>,
}

#[derive(Debug)]
pub struct LoadReport {
	pub generation: Generation,
	pub slaves:     usize,
	pub applied:    usize,
	pub skipped:    usize,
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
	max_slaves: u8,
	capacity:   usize,
}

impl ConfigLoader {
	pub fn new(max_slaves: u8, capacity: usize) -> ConfigLoader {
		ConfigLoader { max_slaves, capacity }
	}

	pub fn from_settings(settings: &Settings) -> ConfigLoader {
		ConfigLoader::new(settings.max_slaves, settings.capacity)
	}

	pub fn empty_generation(&self) -> Generation {
		Generation::new(self.max_slaves, self.capacity)
	}

	/// Fails only if the document is not an array of slave objects.
	pub fn parse(bytes: &[u8]) -> Result<Vec<SlaveDeclaration>, ConfigError> {
		let entries: Vec<SlaveEntry> = serde_json::from_slice(bytes)?;
		Ok(entries.into_iter().enumerate().map(|(idx, entry)| {
			let slave_id = match entry.id {
				None | Some(Value::Null) => Some(idx as i64 + 1),
				Some(id) => id.as_i64().and_then(|id| id.checked_add(1)),
			};
			SlaveDeclaration {
				slave_id,
				registers: entry.registers.into_iter()
					.map(|r| serde_json::from_value(r).map_err(|e| DeclarationError::Malformed(e.to_string())))
					.collect(),
			}
		}).collect())
	}

	pub fn load(&self, bytes: &[u8]) -> Result<LoadReport, ConfigError> {
		let declarations = Self::parse(bytes)?;
		let mut generation = self.empty_generation();
		let mut seen = BTreeSet::new();
		let mut report_slaves = 0;
		let mut applied = 0;
		let mut skipped = 0;

		for slave in declarations {
			let slave_id = match slave.slave_id.map(u8::try_from) {
				Some(Ok(id)) if id >= 1 && id <= self.max_slaves => id,
				_ => {
					let shown = slave.slave_id.map_or_else(|| "?".to_string(), |id| id.to_string());
					warn!("[Slave {}] invalid slave address, outside of 1..={}, skipped", shown, self.max_slaves);
					skipped += slave.registers.len();
					continue;
				},
			};

			let mut banks = SlaveBanks::new(self.capacity);
			for (idx, register) in slave.registers.iter().enumerate() {
				let outcome = match register {
					Ok(decl) => compile(decl, &mut banks),
					Err(e)   => Outcome::Skipped(e.clone()),
				};
				match outcome {
					Outcome::Applied { bank, address, words, written } => {
						let hex: Vec<String> = words.iter().map(|w| format!("{:04X}", w)).collect();
						debug!("[Slave {:02}] {:?} addr={} words={} ({} written)",
							slave_id, bank, address, hex.join(" "), written);
						applied += 1;
					},
					Outcome::Skipped(e) => {
						warn!("[Slave {}] register entry #{} skipped: {}", slave_id, idx, e);
						skipped += 1;
					},
				}
			}

			if !seen.insert(slave_id) {
				warn!("[Slave {}] declared more than once, the later declaration wins", slave_id);
			}
			generation.insert(slave_id, banks);
			report_slaves += 1;
		}

		info!("Loaded {} slaves ({} registers applied, {} skipped)", report_slaves, applied, skipped);
		Ok(LoadReport { generation, slaves: report_slaves, applied, skipped })
	}

	pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<LoadReport, ConfigError> {
		let bytes = tokio::fs::read(path.as_ref()).await?;
		self.load(&bytes)
	}
}
