//! A rank-addressable, reliable point-to-point transport, standing in for
//! the externally assumed one so the protocol is runnable and testable in
//! a single OS process.
//!
//! One unbounded channel per destination rank. Every source's sends into a
//! given destination's channel preserve that source's program order, which
//! gives FIFO delivery per ordered pair; no ordering is implied *across*
//! different sources.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::clock::Timestamp;
use crate::message::{self, Message, Tag};

pub type Rank = u32;

/// A frame as it travels the wire: source rank (supplied by the transport,
/// not the payload), a raw tag word, and the byte payload. The raw `u32`
/// tag (rather than [`Tag`]) lets tests inject a tag value outside the
/// recognized set to exercise the "unknown message kind" drop path.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: Rank,
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// One process's end of the fixed-population channel mesh: a handle to
/// every other process's inbox, and its own inbox.
pub struct Transport {
    rank: Rank,
    senders: Vec<UnboundedSender<Envelope>>,
    receiver: UnboundedReceiver<Envelope>,
}

/// Builds the channel mesh for a fixed population of `world_size`
/// processes, returning one [`Transport`] per rank in `[0, world_size)`.
pub fn build_world(world_size: u32) -> Vec<Transport> {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..world_size).map(|_| unbounded_channel()).unzip();
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, receiver)| Transport {
            rank: rank as Rank,
            senders: senders.clone(),
            receiver,
        })
        .collect()
}

impl Transport {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Sends a tagged, timestamped message to one destination rank.
    /// Delivery is reliable and ordered; the only failure mode is the
    /// destination having already shut down, which this fixed, crash-free
    /// population never triggers in normal operation.
    pub fn send(&self, dest: Rank, timestamp: Timestamp, message: &Message) -> anyhow::Result<()> {
        let (tag, payload) = message::encode(timestamp, message);
        let envelope = Envelope {
            source: self.rank,
            tag: message::tag_as_u32(tag),
            payload,
        };
        self.senders[dest as usize]
            .send(envelope)
            .map_err(|_| anyhow::anyhow!("rank {dest} is no longer reachable"))
    }

    /// Broadcasts to every rank in `dests`, skipping `self.rank` if it
    /// appears (a process never needs to message itself).
    pub fn broadcast(
        &self,
        dests: impl Iterator<Item = Rank>,
        timestamp: Timestamp,
        message: &Message,
    ) -> anyhow::Result<()> {
        for dest in dests {
            if dest != self.rank {
                self.send(dest, timestamp, message)?;
            }
        }
        Ok(())
    }

    /// Blocks until a frame arrives from any source, silently dropping
    /// (and not clock-advancing) any frame whose tag is not in the
    /// recognized set.
    pub async fn recv(&mut self) -> anyhow::Result<(Rank, Timestamp, Message)> {
        loop {
            let envelope = self
                .receiver
                .recv()
                .await
                .ok_or_else(|| anyhow::anyhow!("transport closed"))?;
            let tag = Tag::from_u32(envelope.tag);
            if tag == Tag::Unknown {
                warn!(source = envelope.source, raw_tag = envelope.tag, "<<< dropping unrecognized tag");
                continue;
            }
            match message::decode(tag, &envelope.payload) {
                Ok((timestamp, message)) => return Ok((envelope.source, timestamp, message)),
                Err(err) => {
                    warn!(source = envelope.source, %err, "<<< dropping malformed frame");
                    continue;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn raw_sender(&self, dest: Rank) -> UnboundedSender<Envelope> {
        self.senders[dest as usize].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_from_a_single_source() {
        let mut world = build_world(2);
        let mut receiver = world.remove(1);
        let sender = world.remove(0);

        sender
            .send(1, Timestamp(1), &Message::WmInfo { safehouse_index: 0, wine_volume: 5 })
            .unwrap();
        sender
            .send(1, Timestamp(2), &Message::WmInfo { safehouse_index: 0, wine_volume: 6 })
            .unwrap();

        let (_, _, first) = receiver.recv().await.unwrap();
        let (_, _, second) = receiver.recv().await.unwrap();
        assert_eq!(first, Message::WmInfo { safehouse_index: 0, wine_volume: 5 });
        assert_eq!(second, Message::WmInfo { safehouse_index: 0, wine_volume: 6 });
    }

    #[tokio::test]
    async fn unknown_tag_is_dropped_and_does_not_block_forever() {
        let mut world = build_world(2);
        let mut receiver = world.remove(1);
        let sender = world.remove(0);

        receiver
            .raw_sender(1)
            .send(Envelope {
                source: 0,
                tag: 0xdead_beef,
                payload: vec![],
            })
            .unwrap();
        sender.send(1, Timestamp(3), &Message::WmAck).unwrap();

        let (_, ts, message) = receiver.recv().await.unwrap();
        assert_eq!(ts, Timestamp(3));
        assert_eq!(message, Message::WmAck);
    }
}
