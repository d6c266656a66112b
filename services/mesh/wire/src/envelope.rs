//! Envelope encoding and decoding.
//!
//! An [`Envelope`] is the single unit carried by one datagram. Its kind is named
//! in the fixed header and its body is canonical CBOR of the variant struct.

use crate::announce::{AnnouncePacket, DataMessage, PacketHeader};
use crate::header::{DatagramHeader, MessageKind, DATAGRAM_HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Bare packet header
    Header(PacketHeader),
    /// Announce packet for the discovery protocol
    Announce(AnnouncePacket),
    /// Application payload
    Data(DataMessage),
}

impl Envelope {
    /// Message kind of this envelope
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Header(_) => MessageKind::Header,
            Envelope::Announce(_) => MessageKind::Announce,
            Envelope::Data(_) => MessageKind::Data,
        }
    }

    /// Encode to a single datagram
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let body = match self {
            Envelope::Header(header) => encode_body(header)?,
            Envelope::Announce(packet) => encode_body(packet)?,
            Envelope::Data(message) => encode_body(message)?,
        };

        let total_size = DATAGRAM_HEADER_SIZE + body.len();
        if total_size > MAX_DATAGRAM_SIZE {
            return Err(WireError::Size(total_size));
        }

        let header = DatagramHeader::for_body(self.kind(), &body);
        let mut buf = BytesMut::with_capacity(total_size);
        header.encode(&mut buf);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Decode one datagram
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(WireError::Size(datagram.len()));
        }

        let mut buf = datagram;
        let header = DatagramHeader::decode(&mut buf)?;
        header.verify_body(buf)?;

        match header.kind {
            MessageKind::Header => decode_body(buf).map(Envelope::Header),
            MessageKind::Announce => decode_body(buf).map(Envelope::Announce),
            MessageKind::Data => decode_body(buf).map(Envelope::Data),
        }
    }
}

impl From<PacketHeader> for Envelope {
    fn from(header: PacketHeader) -> Self {
        Envelope::Header(header)
    }
}

impl From<AnnouncePacket> for Envelope {
    fn from(packet: AnnouncePacket) -> Self {
        Envelope::Announce(packet)
    }
}

impl From<DataMessage> for Envelope {
    fn from(message: DataMessage) -> Self {
        Envelope::Data(message)
    }
}

fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(body)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(body).map_err(|e| WireError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::{AnnounceRecord, NodeIdentity, DEFAULT_LINK_COST};
    use std::collections::BTreeMap;

    fn announce_with_neighbor() -> AnnouncePacket {
        let mut neighbors = BTreeMap::new();
        neighbors.insert(
            "peer".to_string(),
            AnnounceRecord {
                identity: NodeIdentity::new("peer", "10.0.0.2:1145"),
                sequence_number: 3,
                cost: DEFAULT_LINK_COST,
                neighbors: vec![NodeIdentity::new("far", "10.0.0.3:1145")],
            },
        );
        AnnouncePacket::from_snapshot(9, NodeIdentity::new("self", "10.0.0.1:1145"), &neighbors)
    }

    #[test]
    fn test_fully_connected_snapshot_fits_one_datagram() {
        const NODES: usize = 64;
        let identities: Vec<NodeIdentity> = (0..NODES)
            .map(|i| NodeIdentity::new(format!("node-{:02}", i), format!("10.0.1.{}:1146", i)))
            .collect();

        // Every neighbor reports every other node.
        let snapshot: BTreeMap<String, AnnounceRecord> = identities[1..]
            .iter()
            .map(|id| {
                let record = AnnounceRecord {
                    identity: id.clone(),
                    sequence_number: 1_000_000,
                    cost: DEFAULT_LINK_COST,
                    neighbors: identities.iter().filter(|other| *other != id).cloned().collect(),
                };
                (id.name.clone(), record)
            })
            .collect();

        let packet = AnnouncePacket::from_snapshot(1_000_000, identities[0].clone(), &snapshot);
        let datagram = Envelope::from(packet.clone()).encode().unwrap();

        assert!(datagram.len() <= MAX_DATAGRAM_SIZE);
        assert_eq!(Envelope::decode(&datagram).unwrap(), Envelope::Announce(packet));
    }

    #[test]
    fn test_announce_datagram_decodes_independently() {
        let packet = announce_with_neighbor();
        let datagram = Envelope::from(packet.clone()).encode().unwrap();

        assert_eq!(datagram[1], MessageKind::Announce as u8);
        assert_eq!(Envelope::decode(&datagram).unwrap(), Envelope::Announce(packet));
    }

    #[test]
    fn test_each_kind_carries_its_tag() {
        let header = Envelope::Header(PacketHeader::new(2)).encode().unwrap();
        let data = Envelope::Data(DataMessage::new("n1", 1, Bytes::from_static(b"hi")))
            .encode()
            .unwrap();

        assert_eq!(header[1], MessageKind::Header as u8);
        assert_eq!(data[1], MessageKind::Data as u8);
        assert_eq!(
            Envelope::decode(&header).unwrap(),
            Envelope::Header(PacketHeader::new(2))
        );
        match Envelope::decode(&data).unwrap() {
            Envelope::Data(message) => assert_eq!(message.payload, Bytes::from_static(b"hi")),
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let mut datagram = Envelope::from(announce_with_neighbor())
            .encode()
            .unwrap()
            .to_vec();
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;

        assert!(matches!(
            Envelope::decode(&datagram),
            Err(WireError::Checksum { .. })
        ));
    }

    #[test]
    fn test_truncated_datagram_rejected() {
        let datagram = Envelope::from(announce_with_neighbor()).encode().unwrap();

        assert!(matches!(
            Envelope::decode(&datagram[..DATAGRAM_HEADER_SIZE - 1]),
            Err(WireError::Incomplete)
        ));
        assert!(matches!(
            Envelope::decode(&datagram[..datagram.len() - 2]),
            Err(WireError::Incomplete)
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_DATAGRAM_SIZE]);
        let result = Envelope::Data(DataMessage::new("n1", 1, payload)).encode();

        assert!(matches!(result, Err(WireError::Size(_))));
    }

    #[test]
    fn test_mismatched_body_rejected() {
        // Header says Announce but the body is a PacketHeader.
        let body = encode_body(&PacketHeader::new(4)).unwrap();
        let header = DatagramHeader::for_body(MessageKind::Announce, &body);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_slice(&body);

        assert!(matches!(Envelope::decode(&buf), Err(WireError::Decode(_))));
    }
}
