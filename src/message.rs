//! The message codec.
//!
//! Six recognized message kinds plus an `Unknown` sentinel, each carried
//! over the wire as a small integer tag and a fixed-width-integer payload
//! whose first word is always the Lamport timestamp. Tag values are
//! transport-level (passed alongside the payload, not embedded in it), the
//! same split a raw TCP/UDP frame draws between addressing and body.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::clock::Timestamp;

/// The six recognized tags, plus `Unknown` for anything else observed on
/// the wire. `Unknown` is never produced by [`encode`]; it only arises when
/// decoding a malformed or foreign frame, and is dropped silently without
/// advancing the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    WmBroadcast,
    WmAcquireReq,
    WmAcquireAck,
    StBroadcast,
    StAcquireReq,
    StAcquireAck,
    Unknown,
}

impl Tag {
    fn as_u32(self) -> u32 {
        match self {
            Tag::WmBroadcast => 0,
            Tag::WmAcquireReq => 1,
            Tag::WmAcquireAck => 2,
            Tag::StBroadcast => 3,
            Tag::StAcquireReq => 4,
            Tag::StAcquireAck => 5,
            Tag::Unknown => u32::MAX,
        }
    }

    pub fn from_u32(value: u32) -> Tag {
        match value {
            0 => Tag::WmBroadcast,
            1 => Tag::WmAcquireReq,
            2 => Tag::WmAcquireAck,
            3 => Tag::StBroadcast,
            4 => Tag::StAcquireReq,
            5 => Tag::StAcquireAck,
            _ => Tag::Unknown,
        }
    }
}

/// An in-memory tagged record: sender, Lamport timestamp, and payload.
/// `sender` is not part of the wire payload — it is supplied by the
/// transport, the same way `MPI_Recv` reports `status.MPI_SOURCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `WM_REQ` — winemaker requests fill-right on a safehouse.
    WmReq { safehouse_index: u64 },
    /// `WM_ACK` — winemaker grants another winemaker's request.
    WmAck,
    /// `WM_INFO` — winemaker announces a deposit, to all students.
    WmInfo { safehouse_index: u64, wine_volume: u64 },
    /// `ST_REQ` — student requests drain-right on a safehouse.
    StReq { safehouse_index: u64, wine_volume: u64 },
    /// `ST_ACK` — student grants another student's request, echoing the
    /// requester's original timestamp.
    StAck { safehouse_index: u64, request_ts: u64 },
    /// `ST_INFO` — student announces a safehouse has been emptied, to all
    /// winemakers.
    StInfo { safehouse_index: u64 },
}

impl Message {
    fn tag(&self) -> Tag {
        match self {
            Message::WmReq { .. } => Tag::WmAcquireReq,
            Message::WmAck => Tag::WmAcquireAck,
            Message::WmInfo { .. } => Tag::WmBroadcast,
            Message::StReq { .. } => Tag::StAcquireReq,
            Message::StAck { .. } => Tag::StAcquireAck,
            Message::StInfo { .. } => Tag::StBroadcast,
        }
    }

    fn words(&self, timestamp: Timestamp) -> Vec<u64> {
        let mut words = vec![timestamp.0];
        match *self {
            Message::WmReq { safehouse_index } => words.push(safehouse_index),
            Message::WmAck => {}
            Message::WmInfo {
                safehouse_index,
                wine_volume,
            } => {
                words.push(safehouse_index);
                words.push(wine_volume);
            }
            Message::StReq {
                safehouse_index,
                wine_volume,
            } => {
                words.push(safehouse_index);
                words.push(wine_volume);
            }
            Message::StAck {
                safehouse_index,
                request_ts,
            } => {
                words.push(safehouse_index);
                words.push(request_ts);
            }
            Message::StInfo { safehouse_index } => words.push(safehouse_index),
        }
        words
    }
}

/// Encodes a message into its wire tag and byte frame. The frame is a
/// sequence of 64-bit little-endian words, first word always the Lamport
/// timestamp.
pub fn encode(timestamp: Timestamp, message: &Message) -> (Tag, Vec<u8>) {
    let words = message.words(timestamp);
    let mut buf = Vec::with_capacity(words.len() * 8);
    for word in words {
        buf.write_u64::<LittleEndian>(word).expect("writing to a Vec never fails");
    }
    (message.tag(), buf)
}

/// Decodes a wire frame back into a timestamp and message. Returns `Err`
/// only for a malformed frame (wrong word count) of an otherwise-known tag;
/// callers are expected to have already dropped `Tag::Unknown` frames
/// before reaching this function.
pub fn decode(tag: Tag, bytes: &[u8]) -> anyhow::Result<(Timestamp, Message)> {
    anyhow::ensure!(bytes.len() % 8 == 0, "frame length not a multiple of 8 bytes");
    let mut words = Vec::with_capacity(bytes.len() / 8);
    let mut cursor = bytes;
    while !cursor.is_empty() {
        words.push(cursor.read_u64::<LittleEndian>()?);
    }
    let mut words = words.into_iter();
    let timestamp = Timestamp(words.next().ok_or_else(|| anyhow::anyhow!("missing timestamp word"))?);
    let mut next = || words.next().ok_or_else(|| anyhow::anyhow!("missing payload word"));
    let message = match tag {
        Tag::WmAcquireReq => Message::WmReq {
            safehouse_index: next()?,
        },
        Tag::WmAcquireAck => Message::WmAck,
        Tag::WmBroadcast => Message::WmInfo {
            safehouse_index: next()?,
            wine_volume: next()?,
        },
        Tag::StAcquireReq => Message::StReq {
            safehouse_index: next()?,
            wine_volume: next()?,
        },
        Tag::StAcquireAck => Message::StAck {
            safehouse_index: next()?,
            request_ts: next()?,
        },
        Tag::StBroadcast => Message::StInfo {
            safehouse_index: next()?,
        },
        Tag::Unknown => anyhow::bail!("cannot decode an unknown tag"),
    };
    Ok((timestamp, message))
}

pub(crate) fn tag_as_u32(tag: Tag) -> u32 {
    tag.as_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message, ts: u64) {
        let (tag, bytes) = encode(Timestamp(ts), &message);
        let (decoded_ts, decoded) = decode(tag, &bytes).unwrap();
        assert_eq!(decoded_ts, Timestamp(ts));
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_every_kind() {
        round_trip(Message::WmReq { safehouse_index: 3 }, 7);
        round_trip(Message::WmAck, 8);
        round_trip(
            Message::WmInfo {
                safehouse_index: 1,
                wine_volume: 42,
            },
            9,
        );
        round_trip(
            Message::StReq {
                safehouse_index: 2,
                wine_volume: 5,
            },
            10,
        );
        round_trip(
            Message::StAck {
                safehouse_index: 2,
                request_ts: 6,
            },
            11,
        );
        round_trip(Message::StInfo { safehouse_index: 0 }, 12);
    }

    #[test]
    fn unknown_tag_round_trip_fails_to_decode() {
        let err = decode(Tag::Unknown, &0u64.to_le_bytes());
        assert!(err.is_err());
    }

    #[test]
    fn tag_round_trips_through_u32() {
        for tag in [
            Tag::WmBroadcast,
            Tag::WmAcquireReq,
            Tag::WmAcquireAck,
            Tag::StBroadcast,
            Tag::StAcquireReq,
            Tag::StAcquireAck,
        ] {
            assert_eq!(Tag::from_u32(tag_as_u32(tag)), tag);
        }
        assert_eq!(Tag::from_u32(0xdead_beef), Tag::Unknown);
    }
}
