//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Register storage shared between the reload loop and client connections
//------------------------------------------------------------------------------
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bank {
	Coils,
	DiscreteInputs,
	HoldingRegisters,
	InputRegisters,
}

impl Bank {
	/// Discrete inputs and input registers can only be changed by a reload.
	pub fn is_writable(self) -> bool {
		matches!(self, Bank::Coils | Bank::HoldingRegisters)
	}
}

/// Four equally sized banks of one slave. Coils and discrete inputs hold
/// 0 or 1 in a full word.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveBanks {
	coils:             Vec<u16>,
	discrete_inputs:   Vec<u16>,
	holding_registers: Vec<u16>,
	input_registers:   Vec<u16>,
}

impl SlaveBanks {
	pub fn new(capacity: usize) -> SlaveBanks {
		SlaveBanks {
			coils:             vec![0u16; capacity],
			discrete_inputs:   vec![0u16; capacity],
			holding_registers: vec![0u16; capacity],
			input_registers:   vec![0u16; capacity],
		}
	}

	pub fn capacity(&self) -> usize {
		self.holding_registers.len()
	}

	pub fn bank(&self, bank: Bank) -> &[u16] {
		match bank {
			Bank::Coils            => &self.coils,
			Bank::DiscreteInputs   => &self.discrete_inputs,
			Bank::HoldingRegisters => &self.holding_registers,
			Bank::InputRegisters   => &self.input_registers,
		}
	}

	pub fn bank_mut(&mut self, bank: Bank) -> &mut [u16] {
		match bank {
			Bank::Coils            => &mut self.coils,
			Bank::DiscreteInputs   => &mut self.discrete_inputs,
			Bank::HoldingRegisters => &mut self.holding_registers,
			Bank::InputRegisters   => &mut self.input_registers,
		}
	}

	fn check_range(&self, bank: Bank, address: usize, count: usize) -> Result<(), StoreError> {
		let capacity = self.capacity();
		match address.checked_add(count) {
			Some(end) if end <= capacity => Ok(()),
			_ => Err(StoreError::AddressOutOfRange { bank, address, count, capacity }),
		}
	}
}

/// One complete snapshot of every served slave.
///
/// A generation is built by the loader, then handed to [`SlaveStore::replace`].
/// After that it is only reachable through `Arc<Generation>` and never changes.
#[derive(Debug, Clone)]
pub struct Generation {
	slaves: BTreeMap<u8, Arc<SlaveBanks>>,
}

impl Generation {
	/// Zero-filled slaves for unit ids `1..=max_slaves`.
	pub fn new(max_slaves: u8, capacity: usize) -> Generation {
		let empty = Arc::new(SlaveBanks::new(capacity));
		Generation {
			slaves: (1..=max_slaves).map(|id| (id, Arc::clone(&empty))).collect(),
		}
	}

	pub fn slave(&self, slave_id: u8) -> Option<&SlaveBanks> {
		self.slaves.get(&slave_id).map(|s| s.as_ref())
	}

	pub fn slave_ids(&self) -> impl Iterator<Item = u8> + '_ {
		self.slaves.keys().copied()
	}

	pub fn insert(&mut self, slave_id: u8, banks: SlaveBanks) {
		self.slaves.insert(slave_id, Arc::new(banks));
	}

	pub fn read(&self, slave_id: u8, bank: Bank, address: usize, count: usize) -> Result<&[u16], StoreError> {
		let slave = self.slave(slave_id).ok_or(StoreError::UnknownSlave(slave_id))?;
		slave.check_range(bank, address, count)?;
		Ok(&slave.bank(bank)[address..address + count])
	}

	// Copy-on-write: only the touched slave is cloned.
	fn with_write(&self, slave_id: u8, bank: Bank, address: usize, values: &[u16]) -> Result<Generation, StoreError> {
		if !bank.is_writable() {
			return Err(StoreError::ReadOnlyBank(bank));
		}
		let mut next = self.clone();
		let slave = next.slaves.get_mut(&slave_id).ok_or(StoreError::UnknownSlave(slave_id))?;
		slave.check_range(bank, address, values.len())?;
		Arc::make_mut(slave).bank_mut(bank)[address..address + values.len()].copy_from_slice(values);
		Ok(next)
	}
}

/// Holds the active generation. Readers take a brief shared lock to clone the
/// pointer; `replace` and client writes swap it under the exclusive lock.
pub struct SlaveStore {
	active: RwLock<Arc<Generation>>,
}

impl SlaveStore {
	pub fn new(initial: Generation) -> SlaveStore {
		SlaveStore { active: RwLock::new(Arc::new(initial)) }
	}

	pub fn snapshot(&self) -> Arc<Generation> {
		Arc::clone(&self.active.read())
	}

	pub fn read(&self, slave_id: u8, bank: Bank, address: usize, count: usize) -> Result<Vec<u16>, StoreError> {
		self.snapshot().read(slave_id, bank, address, count).map(|w| w.to_vec())
	}

	pub fn replace(&self, next: Generation) {
		let next = Arc::new(next);
		*self.active.write() = next;
	}

	/// Transient client write. The next successful reload discards it.
	///
	/// The next generation is built from a snapshot outside the lock. It is
	/// published only if nothing was swapped in meanwhile, otherwise the write
	/// is redone on top of the newer generation.
	pub fn write(&self, slave_id: u8, bank: Bank, address: usize, values: &[u16]) -> Result<(), StoreError> {
		loop {
			let current = self.snapshot();
			let next = Arc::new(current.with_write(slave_id, bank, address, values)?);
			let mut active = self.active.write();
			if Arc::ptr_eq(&active, &current) {
				*active = next;
				return Ok(());
			}
		}
	}
}
