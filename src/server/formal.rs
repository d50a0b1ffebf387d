//------------------------------------------------------------------------------
// author:	Nikita Makarevich (aka DDRDmakar)
// email:	makarevich.98@mail.ru
// 2021
// This code is under MIT license (see LICENSE.txt)
//------------------------------------------------------------------------------
// Modbus TCP slave simulator
// Formal parts of the protocol
//------------------------------------------------------------------------------
use byteorder::{ ByteOrder, BigEndian };

// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MbFunc {
	ReadCoils              = 0x01,
	ReadDiscreteInputs     = 0x02,
	ReadHoldingRegisters   = 0x03,
	ReadInputRegisters     = 0x04,
	WriteSingleCoil        = 0x05,
	WriteSingleRegister    = 0x06,
	WriteMultipleCoils     = 0x0F,
	WriteMultipleRegisters = 0x10,
}

// Modbus exception codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MbExc {
	IllegalFunction                    = 0x01,
	IllegalDataAddress                 = 0x02,
	IllegalDataValue                   = 0x03,
	SlaveDeviceFailure                 = 0x04,
	GatewayPathUnavailable             = 0x0A,
	GatewayTargetDeviceFailedToRespond = 0x0B,
}

#[derive(Debug)]
pub struct MbExcWithMessage {
	pub exc: MbExc,
	pub message: String,
}

impl MbExcWithMessage {
	pub fn new(exc: MbExc, message: String) -> MbExcWithMessage {
		MbExcWithMessage { exc, message }
	}
}

pub fn exc(exc: MbExc, message: impl Into<String>) -> MbExcWithMessage {
	MbExcWithMessage::new(exc, message.into())
}

// Per-request quantity limits from the Modbus application protocol
pub const MAX_READ_BITS: usize       = 2000;
pub const MAX_READ_REGISTERS: usize  = 125;
pub const MAX_WRITE_BITS: usize      = 1968;
pub const MAX_WRITE_REGISTERS: usize = 123;

pub const COIL_ON: u16  = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

pub const MBAP_HEADER_LEN: usize = 7;
pub const MAX_PDU_LEN: usize     = 253;

/// MBAP header. `length` counts the unit id plus the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
	pub transaction_id: u16,
	pub protocol_id:    u16,
	pub length:         u16,
	pub unit_id:        u8,
}

impl MbapHeader {
	pub fn parse(buf: &[u8; MBAP_HEADER_LEN]) -> MbapHeader {
		MbapHeader {
			transaction_id: BigEndian::read_u16(&buf[0..2]),
			protocol_id:    BigEndian::read_u16(&buf[2..4]),
			length:         BigEndian::read_u16(&buf[4..6]),
			unit_id:        buf[6],
		}
	}

	/// Length of the PDU that follows the header, if the length field is sane.
	pub fn pdu_len(&self) -> Option<usize> {
		let len = self.length as usize;
		if len >= 2 && len <= MAX_PDU_LEN + 1 { Some(len - 1) } else { None }
	}

	/// Response header echoing transaction and unit of the request.
	pub fn reply(&self, pdu_len: usize) -> MbapHeader {
		MbapHeader {
			transaction_id: self.transaction_id,
			protocol_id:    0,
			length:         (pdu_len + 1) as u16,
			unit_id:        self.unit_id,
		}
	}

	pub fn encode(&self, dst: &mut Vec<u8>) {
		dst.extend(&self.transaction_id.to_be_bytes());
		dst.extend(&self.protocol_id.to_be_bytes());
		dst.extend(&self.length.to_be_bytes());
		dst.push(self.unit_id);
	}
}

pub fn exception_pdu(function: u8, exc: MbExc) -> Vec<u8> {
	vec![function | 0x80, exc as u8]
}

// Packing of 0/1 words into bits, first item in the LSB of the first byte
pub fn pack_bits(src: &[u16], dst: &mut Vec<u8>) {
	let mut val: u8 = 0;
	for (i, &e) in src.iter().enumerate() {
		let mod8 = i % 8;
		if e != 0 { val |= 1 << mod8; }
		if mod8 == 7 {
			dst.push(val);
			val = 0u8;
		}
	}
	if src.len() % 8 != 0 { dst.push(val); }
}

// Unpacking of `count` bits received from the master into 0/1 words
pub fn unpack_bits(src: &[u8], count: usize) -> Vec<u16> {
	(0..count)
		.map(|i| ((src[i / 8] >> (i % 8)) & 1) as u16)
		.collect()
}

pub fn bytes_for_bits(count: usize) -> usize {
	(count + 7) / 8
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bits_are_lsb_first() {
		let mut dst = Vec::new();
		pack_bits(&[1, 0, 1, 1, 0, 0, 0, 0, 1, 1], &mut dst);
		assert_eq!(dst, vec![0b0000_1101, 0b0000_0011]);
		assert_eq!(unpack_bits(&dst, 10), vec![1, 0, 1, 1, 0, 0, 0, 0, 1, 1]);
	}

	#[test]
	fn header_parse_and_reply() {
		let raw = [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01];
		let h = MbapHeader::parse(&raw);
		assert_eq!(h, MbapHeader { transaction_id: 0x1234, protocol_id: 0, length: 6, unit_id: 1 });
		assert_eq!(h.pdu_len(), Some(5));

		let mut out = Vec::new();
		h.reply(3).encode(&mut out);
		assert_eq!(out, vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x04, 0x01]);
	}

	#[test]
	fn header_length_bounds() {
		let with_len = |length| MbapHeader { transaction_id: 0, protocol_id: 0, length, unit_id: 1 };
		assert_eq!(with_len(1).pdu_len(), None);
		assert_eq!(with_len(2).pdu_len(), Some(1));
		assert_eq!(with_len(254).pdu_len(), Some(253));
		assert_eq!(with_len(255).pdu_len(), None);
	}

	#[test]
	fn exception_sets_high_bit() {
		assert_eq!(exception_pdu(0x03, MbExc::IllegalDataAddress), vec![0x83, 0x02]);
	}
}
