//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Processing of query PDU (Protocol data unit)
//------------------------------------------------------------------------------
use byteorder::{ ByteOrder, BigEndian };
use log::debug;

use crate::error::StoreError;
use crate::server::Server;
use crate::server::formal::*;
use crate::store::Bank;

impl From<StoreError> for MbExcWithMessage {
	fn from(e: StoreError) -> MbExcWithMessage {
		let code = match e {
			StoreError::UnknownSlave(_)          => MbExc::GatewayTargetDeviceFailedToRespond,
			StoreError::AddressOutOfRange { .. } => MbExc::IllegalDataAddress,
			StoreError::ReadOnlyBank(_)          => MbExc::IllegalFunction,
		};
		MbExcWithMessage::new(code, e.to_string())
	}
}

// Offset and quantity of a read request
fn read_request(data: &[u8], max_quantity: usize) -> Result<(usize, usize), MbExcWithMessage> {
	if data.len() < 4 { return Err(exc(MbExc::IllegalDataValue, "Request too short")); }
	let offset   = BigEndian::read_u16(&data[0..2]) as usize;
	let quantity = BigEndian::read_u16(&data[2..4]) as usize;
	if quantity == 0 || quantity > max_quantity {
		return Err(exc(MbExc::IllegalDataValue, format!("Invalid quantity {}", quantity)));
	}
	Ok((offset, quantity))
}

// Offset, quantity and payload of a multiple write request
fn write_request(data: &[u8], max_quantity: usize, bytes_per_quantity: fn(usize) -> usize)
	-> Result<(usize, usize, &[u8]), MbExcWithMessage>
{
	if data.len() < 5 { return Err(exc(MbExc::IllegalDataValue, "Request too short")); }
	let offset     = BigEndian::read_u16(&data[0..2]) as usize;
	let quantity   = BigEndian::read_u16(&data[2..4]) as usize;
	let byte_count = data[4] as usize;
	if quantity == 0 || quantity > max_quantity {
		return Err(exc(MbExc::IllegalDataValue, format!("Invalid quantity {}", quantity)));
	}
	if byte_count != bytes_per_quantity(quantity) || data.len() < 5 + byte_count {
		return Err(exc(MbExc::IllegalDataValue, "Byte count does not match quantity"));
	}
	Ok((offset, quantity, &data[5..5 + byte_count]))
}

fn echo_offset_quantity(function: u8, offset: usize, quantity: usize) -> Vec<u8> {
	let mut odat = Vec::with_capacity(5);
	odat.push(function);
	odat.extend(&(offset as u16).to_be_bytes());
	odat.extend(&(quantity as u16).to_be_bytes());
	odat
}

impl Server {
	/// Answers one request PDU with a response or exception PDU.
	pub(super) fn process(&self, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
		let function = pdu.first().copied().unwrap_or(0);
		match self.process_function_code(unit_id, pdu) {
			Ok(odat) => odat,
			Err(e) => {
				debug!("[Slave {}] FC={:#04x} answered with {:?}: {}", unit_id, function, e.exc, e.message);
				exception_pdu(function, e.exc)
			},
		}
	}

	pub(super) fn process_function_code(&self, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, MbExcWithMessage> {
		if unit_id == 0 || unit_id > self.max_slaves {
			return Err(exc(MbExc::GatewayTargetDeviceFailedToRespond, format!("Unit {} is not served", unit_id)));
		}
		let function: u8 = match pdu.first() {
			Some(&f) => f,
			None     => return Err(exc(MbExc::IllegalFunction, "Empty PDU")),
		};
		let data = &pdu[1..];
		let function_enum: Option<MbFunc> = num::FromPrimitive::from_u8(function);

		match function_enum {
			Some(MbFunc::ReadCoils) | Some(MbFunc::ReadDiscreteInputs) => {
				let bank = if function_enum == Some(MbFunc::ReadCoils) { Bank::Coils } else { Bank::DiscreteInputs };
				let (offset, quantity) = read_request(data, MAX_READ_BITS)?;
				debug!("[Slave {}] Read {:?} offset={} quantity={}", unit_id, bank, offset, quantity);

				let generation = self.store.snapshot();
				let bits = generation.read(unit_id, bank, offset, quantity)?;

				let n_bytes = bytes_for_bits(quantity);
				let mut odat = Vec::with_capacity(2 + n_bytes);
				odat.push(function);
				odat.push(n_bytes as u8);
				pack_bits(bits, &mut odat);
				Ok(odat)
			},

			Some(MbFunc::ReadHoldingRegisters) | Some(MbFunc::ReadInputRegisters) => {
				let bank = if function_enum == Some(MbFunc::ReadHoldingRegisters) {
					Bank::HoldingRegisters
				} else { Bank::InputRegisters };
				let (offset, quantity) = read_request(data, MAX_READ_REGISTERS)?;
				debug!("[Slave {}] Read {:?} offset={} quantity={}", unit_id, bank, offset, quantity);

				let generation = self.store.snapshot();
				let words = generation.read(unit_id, bank, offset, quantity)?;

				let byte_count = quantity * 2;
				let mut odat = vec![0u8; 2 + byte_count];
				odat[0] = function;
				odat[1] = byte_count as u8;
				BigEndian::write_u16_into(words, &mut odat[2..]);
				Ok(odat)
			},

			Some(_) if self.read_only => {
				Err(exc(MbExc::IllegalFunction, "Writes are disabled"))
			},

			Some(MbFunc::WriteSingleCoil) => {
				if data.len() < 4 { return Err(exc(MbExc::IllegalDataValue, "Request too short")); }
				let offset = BigEndian::read_u16(&data[0..2]) as usize;
				let value = match BigEndian::read_u16(&data[2..4]) {
					COIL_ON  => 1,
					COIL_OFF => 0,
					v => return Err(exc(MbExc::IllegalDataValue, format!("Invalid coil value {:#06x}", v))),
				};
				debug!("[Slave {}] WriteSingleCoil offset={} value={}", unit_id, offset, value);
				self.store.write(unit_id, Bank::Coils, offset, &[value])?;
				Ok(pdu[..5].to_vec())
			},

			Some(MbFunc::WriteSingleRegister) => {
				if data.len() < 4 { return Err(exc(MbExc::IllegalDataValue, "Request too short")); }
				let offset = BigEndian::read_u16(&data[0..2]) as usize;
				let value  = BigEndian::read_u16(&data[2..4]);
				debug!("[Slave {}] WriteSingleRegister offset={} value={:#06x}", unit_id, offset, value);
				self.store.write(unit_id, Bank::HoldingRegisters, offset, &[value])?;
				Ok(pdu[..5].to_vec())
			},

			Some(MbFunc::WriteMultipleCoils) => {
				let (offset, quantity, payload) = write_request(data, MAX_WRITE_BITS, bytes_for_bits)?;
				debug!("[Slave {}] WriteMultipleCoils offset={} quantity={}", unit_id, offset, quantity);
				self.store.write(unit_id, Bank::Coils, offset, &unpack_bits(payload, quantity))?;
				Ok(echo_offset_quantity(function, offset, quantity))
			},

			Some(MbFunc::WriteMultipleRegisters) => {
				let (offset, quantity, payload) = write_request(data, MAX_WRITE_REGISTERS, |q| q * 2)?;
				debug!("[Slave {}] WriteMultipleRegisters offset={} quantity={}", unit_id, offset, quantity);
				let mut values = vec![0u16; quantity];
				BigEndian::read_u16_into(payload, &mut values);
				self.store.write(unit_id, Bank::HoldingRegisters, offset, &values)?;
				Ok(echo_offset_quantity(function, offset, quantity))
			},

			None => Err(exc(MbExc::IllegalFunction, format!("Unknown modbus function code {:#04x}", function))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;

	use crate::store::{ Generation, SlaveBanks, SlaveStore };

	fn server(read_only: bool) -> Server {
		let mut gen = Generation::new(2, 100);
		let mut banks = SlaveBanks::new(100);
		banks.bank_mut(Bank::HoldingRegisters)[0..3].copy_from_slice(&[0x0000, 0x3F80, 0x1234]);
		banks.bank_mut(Bank::InputRegisters)[99] = 0xBEEF;
		for &i in &[0usize, 2, 3, 9] { banks.bank_mut(Bank::Coils)[i] = 1; }
		banks.bank_mut(Bank::DiscreteInputs)[1] = 1;
		gen.insert(1, banks);
		Server {
			store:        Arc::new(SlaveStore::new(gen)),
			max_slaves:   2,
			read_only,
			read_timeout: Duration::from_secs(1),
		}
	}

	#[test]
	fn read_holding_registers() {
		let s = server(false);
		assert_eq!(
			s.process(1, &[0x03, 0x00, 0x00, 0x00, 0x03]),
			vec![0x03, 0x06, 0x00, 0x00, 0x3F, 0x80, 0x12, 0x34]
		);
	}

	#[test]
	fn read_last_input_register() {
		let s = server(false);
		assert_eq!(s.process(1, &[0x04, 0x00, 0x63, 0x00, 0x01]), vec![0x04, 0x02, 0xBE, 0xEF]);
	}

	#[test]
	fn read_coils_and_discrete_inputs_pack_bits() {
		let s = server(false);
		assert_eq!(s.process(1, &[0x01, 0x00, 0x00, 0x00, 0x0A]), vec![0x01, 0x02, 0b0000_1101, 0b0000_0010]);
		assert_eq!(s.process(1, &[0x02, 0x00, 0x00, 0x00, 0x03]), vec![0x02, 0x01, 0b0000_0010]);
	}

	#[test]
	fn exceptions() {
		let s = server(false);
		// Unknown function
		assert_eq!(s.process(1, &[0x2B, 0x0E, 0x01, 0x00]), vec![0xAB, 0x01]);
		// Quantity above protocol limit / zero
		assert_eq!(s.process(1, &[0x03, 0x00, 0x00, 0x00, 0x7E]), vec![0x83, 0x03]);
		assert_eq!(s.process(1, &[0x01, 0x00, 0x00, 0x00, 0x00]), vec![0x81, 0x03]);
		// Range past bank capacity
		assert_eq!(s.process(1, &[0x04, 0x00, 0x63, 0x00, 0x02]), vec![0x84, 0x02]);
		// Truncated request
		assert_eq!(s.process(1, &[0x03, 0x00]), vec![0x83, 0x03]);
		// Units outside the served range
		assert_eq!(s.process(0, &[0x03, 0x00, 0x00, 0x00, 0x01]), vec![0x83, 0x0B]);
		assert_eq!(s.process(3, &[0x03, 0x00, 0x00, 0x00, 0x01]), vec![0x83, 0x0B]);
	}

	#[test]
	fn unconfigured_unit_reads_zero() {
		let s = server(false);
		assert_eq!(s.process(2, &[0x03, 0x00, 0x00, 0x00, 0x01]), vec![0x03, 0x02, 0x00, 0x00]);
	}

	#[test]
	fn writes_are_applied_to_the_store() {
		let s = server(false);
		assert_eq!(s.process(1, &[0x06, 0x00, 0x05, 0xAB, 0xCD]), vec![0x06, 0x00, 0x05, 0xAB, 0xCD]);
		assert_eq!(s.process(1, &[0x05, 0x00, 0x01, 0xFF, 0x00]), vec![0x05, 0x00, 0x01, 0xFF, 0x00]);
		assert_eq!(
			s.process(1, &[0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02]),
			vec![0x10, 0x00, 0x10, 0x00, 0x02]
		);
		assert_eq!(
			s.process(1, &[0x0F, 0x00, 0x20, 0x00, 0x03, 0x01, 0b0000_0101]),
			vec![0x0F, 0x00, 0x20, 0x00, 0x03]
		);

		assert_eq!(s.store.read(1, Bank::HoldingRegisters, 5, 1).unwrap(), vec![0xABCD]);
		assert_eq!(s.store.read(1, Bank::HoldingRegisters, 16, 2).unwrap(), vec![1, 2]);
		assert_eq!(s.store.read(1, Bank::Coils, 1, 1).unwrap(), vec![1]);
		assert_eq!(s.store.read(1, Bank::Coils, 32, 3).unwrap(), vec![1, 0, 1]);
	}

	#[test]
	fn invalid_writes() {
		let s = server(false);
		assert_eq!(s.process(1, &[0x05, 0x00, 0x01, 0x12, 0x34]), vec![0x85, 0x03]);
		assert_eq!(s.process(1, &[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x01, 0x00]), vec![0x90, 0x03]);
		assert_eq!(s.process(1, &[0x06, 0x00, 0x64, 0x00, 0x01]), vec![0x86, 0x02]);
	}

	#[test]
	fn read_only_rejects_writes() {
		let s = server(true);
		assert_eq!(s.process(1, &[0x06, 0x00, 0x05, 0xAB, 0xCD]), vec![0x86, 0x01]);
		assert_eq!(s.store.read(1, Bank::HoldingRegisters, 5, 1).unwrap(), vec![0]);
		assert_eq!(s.process(1, &[0x03, 0x00, 0x02, 0x00, 0x01]), vec![0x03, 0x02, 0x12, 0x34]);
	}
}
