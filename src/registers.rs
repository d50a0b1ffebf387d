//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Compilation of typed value declarations into 16-bit register words
//------------------------------------------------------------------------------
use std::convert::TryFrom;

use byteorder::{ ByteOrder, BigEndian };
use serde::Deserialize;
use serde_json::Value;

use crate::error::DeclarationError;
use crate::store::{ Bank, SlaveBanks };

// Function codes accepted in the configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum FunctionCode {
	Coil            = 1,
	DiscreteInput   = 2,
	HoldingRegister = 3,
	InputRegister   = 4,
}

impl FunctionCode {
	pub fn bank(self) -> Bank {
		match self {
			FunctionCode::Coil            => Bank::Coils,
			FunctionCode::DiscreteInput   => Bank::DiscreteInputs,
			FunctionCode::HoldingRegister => Bank::HoldingRegisters,
			FunctionCode::InputRegister   => Bank::InputRegisters,
		}
	}
}

// Data type codes accepted in the configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DataType {
	Signed32   = 1,
	Unsigned32 = 2,
	Float32    = 3,
	Bool       = 5,
}

/// One `registers[]` entry of the configuration document.
///
/// Codes are kept raw so that an unknown code reaches [`compile`] and is
/// reported there instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterDeclaration {
	#[serde(default)]
	pub address: u64,
	#[serde(rename = "fn_code", default = "default_function_code")]
	pub function_code: u64,
	#[serde(default = "default_data_type")]
	pub data_type: u64,
	#[serde(default = "default_value")]
	pub value: Value,
}

fn default_function_code() -> u64 { FunctionCode::HoldingRegister as u64 }
fn default_data_type() -> u64 { DataType::Float32 as u64 }
fn default_value() -> Value { Value::from(0) }

impl Default for RegisterDeclaration {
	fn default() -> Self {
		RegisterDeclaration {
			address:       0,
			function_code: default_function_code(),
			data_type:     default_data_type(),
			value:         default_value(),
		}
	}
}

/// Result of feeding one declaration through [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
	/// `words` are in address-ascending order starting at `address`;
	/// `written` of them landed inside the bank.
	Applied { bank: Bank, address: usize, words: Vec<u16>, written: usize },
	Skipped(DeclarationError),
}

impl Outcome {
	pub fn is_applied(&self) -> bool {
		matches!(self, Outcome::Applied { .. })
	}
}

/// Writes the words of `decl` into `banks`. Never fails: a rejected
/// declaration comes back as [`Outcome::Skipped`] and leaves `banks` untouched.
pub fn compile(decl: &RegisterDeclaration, banks: &mut SlaveBanks) -> Outcome {
	match encode(decl) {
		Ok((bank, words)) => place(banks, bank, decl.address, words),
		Err(e)            => Outcome::Skipped(e),
	}
}

/// Resolves the target bank and the words to store, in address-ascending order.
pub fn encode(decl: &RegisterDeclaration) -> Result<(Bank, Vec<u16>), DeclarationError> {
	let function: FunctionCode = num::FromPrimitive::from_u64(decl.function_code)
		.ok_or(DeclarationError::InvalidFunctionCode(decl.function_code))?;
	let data_type: DataType = num::FromPrimitive::from_u64(decl.data_type)
		.ok_or(DeclarationError::InvalidDataType(decl.data_type))?;

	let words = match (function, data_type) {
		(FunctionCode::Coil, _) | (FunctionCode::DiscreteInput, _) => {
			vec![if truthy(&decl.value) { 1 } else { 0 }]
		},
		(_, DataType::Float32)    => swap_words(to_f32(&decl.value)?.to_be_bytes()).to_vec(),
		(_, DataType::Signed32)   => {
			let v = to_i64(&decl.value)?;
			let v = i32::try_from(v).map_err(|_| DeclarationError::ValueOutOfRange(v.to_string()))?;
			swap_words(v.to_be_bytes()).to_vec()
		},
		(_, DataType::Unsigned32) => {
			// Negative values down to i32::MIN are stored as their two's complement.
			let v = to_i64(&decl.value)?;
			if v < i64::from(i32::MIN) || v > i64::from(u32::MAX) {
				return Err(DeclarationError::ValueOutOfRange(v.to_string()));
			}
			swap_words((v as u32).to_be_bytes()).to_vec()
		},
		(_, DataType::Bool) => {
			return Err(DeclarationError::TypeMismatch {
				function_code: decl.function_code,
				data_type:     decl.data_type,
			});
		},
	};
	Ok((function.bank(), words))
}

// Splits a big-endian 32-bit value into [low word, high word].
// The low word goes to the base address, the high word to address + 1.
fn swap_words(bytes: [u8; 4]) -> [u16; 2] {
	let hi = BigEndian::read_u16(&bytes[0..2]);
	let lo = BigEndian::read_u16(&bytes[2..4]);
	[lo, hi]
}

// Every word is checked against capacity on its own; a high word past the
// end is dropped while the low word is still written.
fn place(banks: &mut SlaveBanks, bank: Bank, address: u64, words: Vec<u16>) -> Outcome {
	let capacity = banks.capacity();
	let base = match usize::try_from(address) {
		Ok(a) if a < capacity => a,
		_ => return Outcome::Skipped(DeclarationError::AddressOutOfRange { address, capacity }),
	};

	let target = banks.bank_mut(bank);
	let mut written = 0;
	for (i, &w) in words.iter().enumerate() {
		if let Some(slot) = target.get_mut(base + i) {
			*slot = w;
			written += 1;
		}
	}
	Outcome::Applied { bank, address: base, words, written }
}

pub fn truthy(value: &Value) -> bool {
	match value {
		Value::Null      => false,
		Value::Bool(b)   => *b,
		Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
		Value::String(s) => !s.is_empty(),
		Value::Array(a)  => !a.is_empty(),
		Value::Object(o) => !o.is_empty(),
	}
}

fn to_f32(value: &Value) -> Result<f32, DeclarationError> {
	let f = match value {
		Value::Number(n) => n.as_f64(),
		Value::Bool(b)   => Some(if *b { 1.0 } else { 0.0 }),
		Value::String(s) => s.trim().parse::<f64>().ok(),
		_                => None,
	}.ok_or_else(|| DeclarationError::InvalidValue(value.to_string()))?;

	if f.is_finite() && f.abs() > f32::MAX as f64 {
		return Err(DeclarationError::ValueOutOfRange(value.to_string()));
	}
	Ok(f as f32)
}

fn to_i64(value: &Value) -> Result<i64, DeclarationError> {
	match value {
		Value::Number(n) => {
			if let Some(i) = n.as_i64() { return Ok(i); }
			if n.is_u64() { return Err(DeclarationError::ValueOutOfRange(value.to_string())); }
			let f = n.as_f64().unwrap_or(f64::NAN).trunc();
			if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
				Ok(f as i64)
			}
			else { Err(DeclarationError::ValueOutOfRange(value.to_string())) }
		},
		Value::Bool(b)   => Ok(*b as i64),
		Value::String(s) => s.trim().parse::<i64>()
			.map_err(|_| DeclarationError::InvalidValue(value.to_string())),
		_ => Err(DeclarationError::InvalidValue(value.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn decl(function_code: u64, data_type: u64, address: u64, value: Value) -> RegisterDeclaration {
		RegisterDeclaration { address, function_code, data_type, value }
	}

	#[test]
	fn float32_low_word_first() {
		let mut banks = SlaveBanks::new(2000);
		let outcome = compile(&decl(3, 3, 100, json!(1.0)), &mut banks);
		assert!(outcome.is_applied());
		assert_eq!(banks.bank(Bank::HoldingRegisters)[100], 0x0000);
		assert_eq!(banks.bank(Bank::HoldingRegisters)[101], 0x3F80);
	}

	#[test]
	fn float32_fractional_value() {
		// 123.456f32 == 0x42F6E979
		let mut banks = SlaveBanks::new(2000);
		compile(&decl(4, 3, 0, json!(123.456)), &mut banks);
		assert_eq!(&banks.bank(Bank::InputRegisters)[0..2], &[0xE979, 0x42F6]);
	}

	#[test]
	fn signed32_into_input_registers() {
		let mut banks = SlaveBanks::new(2000);
		compile(&decl(4, 1, 50, json!(5)), &mut banks);
		assert_eq!(banks.bank(Bank::InputRegisters)[50], 0x0005);
		assert_eq!(banks.bank(Bank::InputRegisters)[51], 0x0000);
	}

	#[test]
	fn negative_signed32_is_twos_complement() {
		let mut banks = SlaveBanks::new(16);
		compile(&decl(3, 1, 0, json!(-2)), &mut banks);
		assert_eq!(&banks.bank(Bank::HoldingRegisters)[0..2], &[0xFFFE, 0xFFFF]);
	}

	#[test]
	fn unsigned32_full_range() {
		let mut banks = SlaveBanks::new(16);
		compile(&decl(3, 2, 2, json!(0x1234_5678u32)), &mut banks);
		assert_eq!(&banks.bank(Bank::HoldingRegisters)[2..4], &[0x5678, 0x1234]);

		compile(&decl(3, 2, 4, json!(-1)), &mut banks);
		assert_eq!(&banks.bank(Bank::HoldingRegisters)[4..6], &[0xFFFF, 0xFFFF]);

		let outcome = compile(&decl(3, 2, 6, json!(-2_147_483_649i64)), &mut banks);
		assert!(matches!(outcome, Outcome::Skipped(DeclarationError::ValueOutOfRange(_))));
		let outcome = compile(&decl(3, 2, 6, json!(4_294_967_296u64)), &mut banks);
		assert!(matches!(outcome, Outcome::Skipped(DeclarationError::ValueOutOfRange(_))));
		assert_eq!(&banks.bank(Bank::HoldingRegisters)[6..8], &[0, 0]);
	}

	#[test]
	fn signed32_overflow_is_skipped() {
		let mut banks = SlaveBanks::new(16);
		let outcome = compile(&decl(3, 1, 0, json!(3_000_000_000u64)), &mut banks);
		assert!(matches!(outcome, Outcome::Skipped(DeclarationError::ValueOutOfRange(_))));
		assert!(banks.bank(Bank::HoldingRegisters).iter().all(|&w| w == 0));
	}

	#[test]
	fn integer_from_float_truncates() {
		let mut banks = SlaveBanks::new(16);
		compile(&decl(3, 1, 0, json!(7.9)), &mut banks);
		assert_eq!(banks.bank(Bank::HoldingRegisters)[0], 7);
	}

	#[test]
	fn booleans_by_truthiness() {
		let mut banks = SlaveBanks::new(2000);
		compile(&decl(1, 5, 10, json!(true)), &mut banks);
		compile(&decl(2, 5, 20, json!(false)), &mut banks);
		compile(&decl(1, 3, 11, json!(2.5)), &mut banks);
		compile(&decl(1, 5, 12, json!(0)), &mut banks);
		assert_eq!(banks.bank(Bank::Coils)[10], 1);
		assert_eq!(banks.bank(Bank::DiscreteInputs)[20], 0);
		assert_eq!(banks.bank(Bank::Coils)[11], 1);
		assert_eq!(banks.bank(Bank::Coils)[12], 0);
	}

	#[test]
	fn rejects_unknown_codes() {
		let mut banks = SlaveBanks::new(16);
		assert_eq!(
			compile(&decl(9, 3, 0, json!(1)), &mut banks),
			Outcome::Skipped(DeclarationError::InvalidFunctionCode(9))
		);
		assert_eq!(
			compile(&decl(3, 4, 0, json!(1)), &mut banks),
			Outcome::Skipped(DeclarationError::InvalidDataType(4))
		);
		assert_eq!(
			compile(&decl(3, 5, 0, json!(true)), &mut banks),
			Outcome::Skipped(DeclarationError::TypeMismatch { function_code: 3, data_type: 5 })
		);
	}

	#[test]
	fn high_word_past_capacity_is_dropped() {
		let mut banks = SlaveBanks::new(2000);
		let outcome = compile(&decl(3, 3, 1999, json!(1.0)), &mut banks);
		match outcome {
			Outcome::Applied { written, ref words, .. } => {
				assert_eq!(written, 1);
				assert_eq!(words.len(), 2);
			},
			other => panic!("unexpected outcome {:?}", other),
		}
		assert_eq!(banks.bank(Bank::HoldingRegisters).len(), 2000);
		assert_eq!(banks.bank(Bank::HoldingRegisters)[1999], 0x0000);

		let mut banks = SlaveBanks::new(2000);
		compile(&decl(3, 1, 1999, json!(0x0001_0002)), &mut banks);
		assert_eq!(banks.bank(Bank::HoldingRegisters)[1999], 0x0002);
	}

	#[test]
	fn address_past_capacity_is_skipped() {
		let mut banks = SlaveBanks::new(2000);
		let outcome = compile(&decl(1, 5, 2000, json!(true)), &mut banks);
		assert_eq!(
			outcome,
			Outcome::Skipped(DeclarationError::AddressOutOfRange { address: 2000, capacity: 2000 })
		);
	}

	#[test]
	fn numeric_strings_are_accepted() {
		let mut banks = SlaveBanks::new(16);
		compile(&decl(3, 1, 0, json!("42")), &mut banks);
		assert_eq!(banks.bank(Bank::HoldingRegisters)[0], 42);

		let outcome = compile(&decl(3, 3, 2, json!("abc")), &mut banks);
		assert!(matches!(outcome, Outcome::Skipped(DeclarationError::InvalidValue(_))));
	}

	#[test]
	fn missing_fields_use_defaults() {
		let parsed: RegisterDeclaration = serde_json::from_value(json!({})).unwrap();
		assert_eq!(parsed, RegisterDeclaration::default());
		assert_eq!(parsed.function_code, 3);
		assert_eq!(parsed.data_type, 3);
	}
}
