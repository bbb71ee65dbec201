use anyhow::{anyhow, Result};

/// Bytes taken by the sequence number and send timestamp at the front of
/// every probe datagram.
pub const HEADER_LEN: usize = 12;
/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65507;

const FILLER: u8 = b'x';

/// Fixed-layout probe header: 4-byte big-endian sequence number followed by
/// an 8-byte big-endian IEEE-754 send timestamp. The responder never parses
/// this; it only exists on the prober side of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeHeader {
    pub seq: u32,
    pub timestamp: f64,
}

impl ProbeHeader {
    /// Render the full datagram: header then filler up to `packet_size`.
    /// `packet_size` must already be validated to hold the header.
    pub fn encode(&self, packet_size: usize) -> Vec<u8> {
        debug_assert!(packet_size >= HEADER_LEN);
        let mut buf = Vec::with_capacity(packet_size);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.resize(packet_size, FILLER);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<ProbeHeader> {
        if buf.len() < HEADER_LEN {
            return Err(anyhow!(
                "datagram too short for probe header: {} bytes",
                buf.len()
            ));
        }
        let seq = u32::from_be_bytes(buf[..4].try_into()?);
        let timestamp = f64::from_be_bytes(buf[4..HEADER_LEN].try_into()?);
        Ok(ProbeHeader { seq, timestamp })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_layout_is_big_endian() {
        let header = ProbeHeader {
            seq: 0x0102_0304,
            timestamp: 2.5,
        };
        let buf = header.encode(HEADER_LEN);
        assert_eq!(&buf[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[4..], &2.5f64.to_be_bytes());
    }

    #[test]
    fn minimum_size_has_no_filler() {
        let buf = ProbeHeader {
            seq: 1,
            timestamp: 0.0,
        }
        .encode(HEADER_LEN);
        assert_eq!(buf.len(), HEADER_LEN);
    }

    #[test]
    fn padding_fills_to_packet_size() {
        let buf = ProbeHeader {
            seq: 7,
            timestamp: 1.0,
        }
        .encode(20);
        assert_eq!(buf.len(), 20);
        assert!(buf[HEADER_LEN..].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let header = ProbeHeader {
            seq: 42,
            timestamp: 1700000000.123456,
        };
        let decoded = ProbeHeader::decode(&header.encode(64)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(ProbeHeader::decode(&[0u8; HEADER_LEN - 1]).is_err());
    }
}
