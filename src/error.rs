//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Error types
//------------------------------------------------------------------------------
use std::io;

use thiserror::Error;

use crate::store::Bank;

/// Whole-document failure. The previously active generation stays in place.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("cannot read configuration document: {0}")]
	Io(#[from] io::Error),
	#[error("malformed configuration document: {0}")]
	Json(#[from] serde_json::Error),
}

/// A single register declaration was rejected. The rest of the slave still loads.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeclarationError {
	#[error("invalid function code {0}")]
	InvalidFunctionCode(u64),
	#[error("invalid data type {0}")]
	InvalidDataType(u64),
	#[error("data type {data_type} cannot be stored with function code {function_code}")]
	TypeMismatch { function_code: u64, data_type: u64 },
	#[error("value {0} does not fit the declared data type")]
	ValueOutOfRange(String),
	#[error("value {0} cannot be converted to the declared data type")]
	InvalidValue(String),
	#[error("address {address} is outside of bank capacity {capacity}")]
	AddressOutOfRange { address: u64, capacity: usize },
	#[error("malformed register entry: {0}")]
	Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
	#[error("slave {0} is not served")]
	UnknownSlave(u8),
	#[error("range {address}..{address}+{count} exceeds {bank:?} capacity {capacity}")]
	AddressOutOfRange { bank: Bank, address: usize, count: usize, capacity: usize },
	#[error("{0:?} bank is read-only")]
	ReadOnlyBank(Bank),
}

/// Errors that end a client connection.
#[derive(Debug, Error)]
pub enum FrameError {
	#[error("transport error: {0}")]
	Io(#[from] io::Error),
	#[error("idle read timeout")]
	Timeout,
	#[error("unexpected protocol identifier {0:#06x}")]
	BadProtocolId(u16),
	#[error("invalid MBAP length field {0}")]
	BadLength(u16),
}
