//! Ancillary-data wire-format structs.
//!
//! The full ancillary-data codec (packet reassembly across an entire video
//! frame, DID/SDID-keyed routing to consumers) stays an external
//! collaborator, out of scope here. But packetize∘unpacketize = identity
//! (with parity errors counted exactly) is a testable round-trip property,
//! which needs the wire-format structs to exist even though the full codec
//! doesn't: a 4-byte payload header (packet count, field kind), a per-packet
//! header (DID, SDID, data count), and 10-bit user-data words carrying
//! parity.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AncillaryError {
    #[error("buffer too small to encode ancillary payload")]
    BufferTooSmall,
    #[error("ancillary payload truncated")]
    Truncated,
    #[error("unrecognized field kind byte: {0}")]
    UnknownFieldKind(u8),
}

/// Which field of an interlaced (or progressive) frame a payload's
/// ancillary packets belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncillaryFieldKind {
    Progressive,
    Field1,
    Field2,
}

impl AncillaryFieldKind {
    fn to_byte(self) -> u8 {
        match self {
            AncillaryFieldKind::Progressive => 0,
            AncillaryFieldKind::Field1 => 1,
            AncillaryFieldKind::Field2 => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, AncillaryError> {
        match byte {
            0 => Ok(AncillaryFieldKind::Progressive),
            1 => Ok(AncillaryFieldKind::Field1),
            2 => Ok(AncillaryFieldKind::Field2),
            other => Err(AncillaryError::UnknownFieldKind(other)),
        }
    }
}

/// The 4-byte payload header preceding every packet's worth of ancillary
/// data: how many packets follow, and which field they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncillaryPayloadHeader {
    pub packet_count: u8,
    pub field_kind: AncillaryFieldKind,
}

const PAYLOAD_HEADER_SIZE: usize = 4;
const PACKET_HEADER_SIZE: usize = 3;

impl AncillaryPayloadHeader {
    fn encode(self, buf: &mut [u8]) -> Result<(), AncillaryError> {
        if buf.len() < PAYLOAD_HEADER_SIZE {
            return Err(AncillaryError::BufferTooSmall);
        }
        buf[0] = self.packet_count;
        buf[1] = self.field_kind.to_byte();
        buf[2] = 0;
        buf[3] = 0;
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self, AncillaryError> {
        if buf.len() < PAYLOAD_HEADER_SIZE {
            return Err(AncillaryError::Truncated);
        }
        Ok(Self {
            packet_count: buf[0],
            field_kind: AncillaryFieldKind::from_byte(buf[1])?,
        })
    }
}

/// A single ancillary packet's header fields: DID, SDID, data count.
/// `DID`/`SDID` (data ID / secondary data ID) identify what kind of
/// ancillary data the packet carries; `data_count` is the number of 10-bit
/// user-data words that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncillaryPacketHeader {
    pub did: u8,
    pub sdid: u8,
    pub data_count: u8,
}

/// One packet of application ancillary data: a header plus its user-data
/// bytes, each of which is carried on the wire as a 10-bit word with
/// parity (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncillaryPacket {
    pub did: u8,
    pub sdid: u8,
    pub data: Vec<u8>,
}

impl AncillaryPacket {
    fn header(&self) -> AncillaryPacketHeader {
        AncillaryPacketHeader {
            did: self.did,
            sdid: self.sdid,
            data_count: self.data.len() as u8,
        }
    }

    fn encode_header(&self, buf: &mut [u8]) -> Result<(), AncillaryError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(AncillaryError::BufferTooSmall);
        }
        let header = self.header();
        buf[0] = header.did;
        buf[1] = header.sdid;
        buf[2] = header.data_count;
        Ok(())
    }

    fn decode_header(buf: &[u8]) -> Result<AncillaryPacketHeader, AncillaryError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(AncillaryError::Truncated);
        }
        Ok(AncillaryPacketHeader {
            did: buf[0],
            sdid: buf[1],
            data_count: buf[2],
        })
    }
}

/// Encodes one data byte as a 10-bit word: bits 0-7 are the data, bit 8 is
/// even parity over those bits, bit 9 is the inverse of bit 8. Returned as
/// a `u16` with the top six bits always clear.
pub fn encode_word(data: u8) -> u16 {
    let parity_bit = (data.count_ones() % 2 == 0) as u16;
    (data as u16) | (parity_bit << 8) | ((1 - parity_bit) << 9)
}

/// Inverse of [`encode_word`]. Returns the data byte and whether the
/// word's parity bits were internally consistent; a caller that wants the
/// "parity errors are counted exactly" property should tally the
/// `false` case rather than treat it as fatal, since the round-trip
/// property is defined over a stream of these words.
pub fn decode_word(word: u16) -> (u8, bool) {
    let data = (word & 0xFF) as u8;
    let parity_bit = (word >> 8) & 1;
    let inverse_bit = (word >> 9) & 1;
    let expected_parity = (data.count_ones() % 2 == 0) as u16;
    let ok = parity_bit == expected_parity && inverse_bit == 1 - parity_bit;
    (data, ok)
}

/// Result of [`unpacketize`]: the decoded packets plus how many user-data
/// words failed their parity check. A nonzero count does not make
/// unpacketize fail outright — each bad word's data bits are still
/// returned, matching how a receiver logs and continues rather than
/// dropping an otherwise-valid packet over one corrupt word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpacketizeResult {
    pub field_kind: AncillaryFieldKind,
    pub packets: Vec<AncillaryPacket>,
    pub parity_errors: usize,
}

/// Serializes `packets` into the wire format: a 4-byte payload header,
/// then each packet's 3-byte header followed by its data bytes as 10-bit
/// words (2 bytes each, little-endian), zero-padded so the whole buffer's
/// length is a multiple of 4 bytes, the wire constraint this format is built around).
pub fn packetize(field_kind: AncillaryFieldKind, packets: &[AncillaryPacket]) -> Result<Vec<u8>, AncillaryError> {
    if packets.len() > u8::MAX as usize {
        return Err(AncillaryError::BufferTooSmall);
    }

    let mut buf = vec![0u8; PAYLOAD_HEADER_SIZE];
    AncillaryPayloadHeader {
        packet_count: packets.len() as u8,
        field_kind,
    }
    .encode(&mut buf)?;

    for packet in packets {
        if packet.data.len() > u8::MAX as usize {
            return Err(AncillaryError::BufferTooSmall);
        }
        let mut packet_header = [0u8; PACKET_HEADER_SIZE];
        packet.encode_header(&mut packet_header)?;
        buf.extend_from_slice(&packet_header);
        for &byte in &packet.data {
            buf.extend_from_slice(&encode_word(byte).to_le_bytes());
        }
    }

    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    Ok(buf)
}

/// Inverse of [`packetize`]. Trailing zero padding beyond the last packet
/// is tolerated, not validated, since it carries no information.
pub fn unpacketize(buf: &[u8]) -> Result<UnpacketizeResult, AncillaryError> {
    let header = AncillaryPayloadHeader::decode(buf)?;
    let mut cursor = PAYLOAD_HEADER_SIZE;
    let mut packets = Vec::with_capacity(header.packet_count as usize);
    let mut parity_errors = 0;

    for _ in 0..header.packet_count {
        if buf.len() < cursor + PACKET_HEADER_SIZE {
            return Err(AncillaryError::Truncated);
        }
        let packet_header = AncillaryPacket::decode_header(&buf[cursor..])?;
        cursor += PACKET_HEADER_SIZE;

        let data_count = packet_header.data_count as usize;
        if buf.len() < cursor + data_count * 2 {
            return Err(AncillaryError::Truncated);
        }
        let mut data = Vec::with_capacity(data_count);
        for _ in 0..data_count {
            let word = u16::from_le_bytes([buf[cursor], buf[cursor + 1]]);
            cursor += 2;
            let (byte, ok) = decode_word(word);
            if !ok {
                parity_errors += 1;
            }
            data.push(byte);
        }
        packets.push(AncillaryPacket {
            did: packet_header.did,
            sdid: packet_header.sdid,
            data,
        });
    }

    Ok(UnpacketizeResult {
        field_kind: header.field_kind,
        packets,
        parity_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_round_trips_without_error() {
        for data in 0u8..=255 {
            let word = encode_word(data);
            let (decoded, ok) = decode_word(word);
            assert!(ok, "word for {data} should have consistent parity");
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn corrupted_parity_bit_is_detected() {
        let word = encode_word(0b0101_0101) ^ (1 << 8);
        let (_, ok) = decode_word(word);
        assert!(!ok);
    }

    #[test]
    fn packetize_unpacketize_round_trips_with_no_errors() {
        let packets = vec![
            AncillaryPacket {
                did: 0x61,
                sdid: 0x01,
                data: vec![1, 2, 3, 4, 5],
            },
            AncillaryPacket {
                did: 0x60,
                sdid: 0x02,
                data: vec![9, 8, 7],
            },
        ];
        let wire = packetize(AncillaryFieldKind::Field1, &packets).unwrap();
        assert_eq!(wire.len() % 4, 0);

        let result = unpacketize(&wire).unwrap();
        assert_eq!(result.field_kind, AncillaryFieldKind::Field1);
        assert_eq!(result.packets, packets);
        assert_eq!(result.parity_errors, 0);
    }

    #[test]
    fn unpacketize_counts_parity_errors_exactly() {
        let packets = vec![AncillaryPacket {
            did: 0x61,
            sdid: 0x01,
            data: vec![1, 2, 3],
        }];
        let mut wire = packetize(AncillaryFieldKind::Progressive, &packets).unwrap();

        // Flip the parity bit of the second data word only.
        let second_word_offset = PAYLOAD_HEADER_SIZE + PACKET_HEADER_SIZE + 2;
        wire[second_word_offset + 1] ^= 0b0000_0001;

        let result = unpacketize(&wire).unwrap();
        assert_eq!(result.parity_errors, 1);
        assert_eq!(result.packets[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn unpacketize_rejects_truncated_buffer() {
        let packets = vec![AncillaryPacket {
            did: 1,
            sdid: 2,
            data: vec![3, 4],
        }];
        let wire = packetize(AncillaryFieldKind::Progressive, &packets).unwrap();
        assert_eq!(unpacketize(&wire[..wire.len() - 4]), Err(AncillaryError::Truncated));
    }

    #[test]
    fn unpacketize_rejects_unknown_field_kind() {
        let mut wire = vec![0u8; 4];
        wire[1] = 99;
        assert_eq!(unpacketize(&wire), Err(AncillaryError::UnknownFieldKind(99)));
    }
}
