//! Winemaker core: acquiring exclusive fill-rights to one specific
//! safehouse, depositing wine, then waiting for a student to signal it is
//! empty again.
//!
//! Small synchronous handler methods reused across the request and hold
//! phases, driven by a plain `recv`-in-a-loop outer cycle so every received
//! message is handled atomically before the next `recv`.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::clock::{LamportClock, Priority, Timestamp};
use crate::config::Config;
use crate::message::Message;
use crate::oracle::VolumeOracle;
use crate::transport::{Rank, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Requesting,
    Holding,
}

pub struct Winemaker<O> {
    rank: Rank,
    home_safehouse: u32,
    winemaker_count: u32,
    clock: LamportClock,
    last_req_ts: Timestamp,
    ack_count: u32,
    pending_acks: VecDeque<Rank>,
    phase: Phase,
    oracle: O,
}

impl<O: VolumeOracle> Winemaker<O> {
    pub fn new(config: &Config, rank: Rank, oracle: O) -> Self {
        assert!(config.winemaker_ranks().contains(&rank), "rank {rank} is not a winemaker");
        Self {
            rank,
            home_safehouse: config.home_safehouse(rank),
            winemaker_count: config.winemaker_count,
            clock: LamportClock::new(),
            last_req_ts: Timestamp::ZERO,
            ack_count: 0,
            pending_acks: VecDeque::new(),
            phase: Phase::Idle,
            oracle,
        }
    }

    pub fn home_safehouse(&self) -> u32 {
        self.home_safehouse
    }

    /// Runs the outer cycle forever: `IDLE -> REQUESTING -> HOLDING ->
    /// IDLE`. Never returns under normal operation.
    pub async fn run(mut self, config: Config, mut transport: Transport) -> anyhow::Result<()> {
        loop {
            self.start_request(&config, &transport)?;
            self.collect_acks(&mut transport).await?;
            self.deposit(&config, &mut transport)?;
            self.await_emptied(&mut transport).await?;
        }
    }

    fn start_request(&mut self, config: &Config, transport: &Transport) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.phase == Phase::Idle,
            "protocol misuse: winemaker {} started a request while {:?}",
            self.rank,
            self.phase
        );
        let ts = self.clock.tick();
        self.last_req_ts = ts;
        self.ack_count = 0;
        self.phase = Phase::Requesting;
        debug!(rank = self.rank, ts = ts.0, safehouse = self.home_safehouse, "WM_REQ");
        transport.broadcast(
            config.winemaker_ranks().filter(|&r| r != self.rank),
            ts,
            &Message::WmReq {
                safehouse_index: self.home_safehouse as u64,
            },
        )
    }

    async fn collect_acks(&mut self, transport: &mut Transport) -> anyhow::Result<()> {
        let needed = self.winemaker_count - 1;
        while self.ack_count < needed {
            let (source, ts, message) = transport.recv().await?;
            self.clock.observe(ts);
            match message {
                Message::WmAck => self.ack_count += 1,
                Message::WmReq { safehouse_index } => {
                    self.handle_peer_request(transport, source, ts, safehouse_index as u32)?
                }
                Message::StInfo { .. } => {
                    // ignored while requesting: a fill is still in flight,
                    // so nothing has been deposited yet for it to report
                    // as emptied.
                }
                other => warn!(rank = self.rank, ?other, "protocol misuse: unexpected message while requesting"),
            }
        }
        Ok(())
    }

    fn handle_peer_request(
        &mut self,
        transport: &Transport,
        peer: Rank,
        peer_ts: Timestamp,
        safehouse_index: u32,
    ) -> anyhow::Result<()> {
        if safehouse_index != self.home_safehouse {
            // impossible under protocol (every winemaker targets only its
            // own home) but an ACK is the safe response regardless.
            return self.send_ack(transport, peer);
        }
        let peer_priority = Priority::new(peer_ts, peer);
        let our_priority = Priority::new(self.last_req_ts, self.rank);
        if peer_priority < our_priority {
            self.send_ack(transport, peer)
        } else {
            self.pending_acks.push_back(peer);
            self.ack_count += 1;
            Ok(())
        }
    }

    fn send_ack(&mut self, transport: &Transport, dest: Rank) -> anyhow::Result<()> {
        let ts = self.clock.tick();
        transport.send(dest, ts, &Message::WmAck)
    }

    fn deposit(&mut self, config: &Config, transport: &mut Transport) -> anyhow::Result<()> {
        self.phase = Phase::Holding;
        let volume = self.oracle.sample();
        let ts = self.clock.tick();
        info!(rank = self.rank, ts = ts.0, safehouse = self.home_safehouse, volume, "WM_INFO");
        transport.broadcast(
            config.student_ranks(),
            ts,
            &Message::WmInfo {
                safehouse_index: self.home_safehouse as u64,
                wine_volume: volume,
            },
        )
    }

    async fn await_emptied(&mut self, transport: &mut Transport) -> anyhow::Result<()> {
        loop {
            let (source, ts, message) = transport.recv().await?;
            self.clock.observe(ts);
            match message {
                Message::StInfo { safehouse_index } if safehouse_index as u32 == self.home_safehouse => {
                    debug!(rank = self.rank, ts = ts.0, "ST_INFO(home) observed, releasing");
                    self.flush_pending_acks(transport)?;
                    self.phase = Phase::Idle;
                    return Ok(());
                }
                Message::StInfo { .. } => {
                    // a different safehouse emptied; conveys no information
                    // relevant to this winemaker.
                }
                Message::WmReq { safehouse_index } => {
                    self.handle_peer_request_while_holding(transport, source, safehouse_index as u32)?
                }
                other => warn!(rank = self.rank, ?other, "protocol misuse: unexpected message while holding"),
            }
        }
    }

    fn handle_peer_request_while_holding(
        &mut self,
        transport: &Transport,
        peer: Rank,
        safehouse_index: u32,
    ) -> anyhow::Result<()> {
        if safehouse_index != self.home_safehouse {
            self.send_ack(transport, peer)
        } else {
            // we still hold the fill-right; defer until we release.
            self.pending_acks.push_back(peer);
            Ok(())
        }
    }

    fn flush_pending_acks(&mut self, transport: &Transport) -> anyhow::Result<()> {
        while let Some(peer) = self.pending_acks.pop_front() {
            self.send_ack(transport, peer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::build_world;

    struct FixedVolume(u64);
    impl VolumeOracle for FixedVolume {
        fn sample(&mut self) -> u64 {
            self.0
        }
    }

    #[tokio::test]
    async fn single_winemaker_single_student_fills_then_waits() {
        let config = Config {
            safehouse_count: 1,
            winemaker_count: 1,
            student_count: 1,
            min_wine_volume: 5,
            max_wine_volume: 5,
        };
        let mut world = build_world(config.world_size());
        let mut student_transport = world.remove(1);
        let winemaker_transport = world.remove(0);

        let winemaker = Winemaker::new(&config, 0, FixedVolume(5));
        tokio::spawn(winemaker.run(config, winemaker_transport));

        let (_, _, message) = student_transport.recv().await.unwrap();
        assert_eq!(
            message,
            Message::WmInfo {
                safehouse_index: 0,
                wine_volume: 5
            }
        );
    }

    #[tokio::test]
    async fn peer_request_losing_tie_is_deferred_and_counted() {
        let config = Config {
            safehouse_count: 1,
            winemaker_count: 2,
            student_count: 1,
            min_wine_volume: 3,
            max_wine_volume: 3,
        };
        let mut world = build_world(config.world_size());
        let mut peer_transport = world.remove(1); // acts as winemaker rank 1
        let winemaker_transport = world.remove(0);

        let winemaker = Winemaker::new(&config, 0, FixedVolume(3));
        let handle = tokio::spawn(winemaker.run(config, winemaker_transport));

        // rank 0 sends its WM_REQ to rank 1 first; consume it, then send a
        // higher-priority (larger timestamp) WM_REQ back so rank 0 wins the
        // tie and counts rank 1 as deferred.
        let (_, req_ts, req) = peer_transport.recv().await.unwrap();
        assert_eq!(req, Message::WmReq { safehouse_index: 0 });
        peer_transport
            .send(0, Timestamp(req_ts.0 + 100), &Message::WmReq { safehouse_index: 0 })
            .unwrap();

        let (_, _, info) = peer_transport.recv().await.unwrap();
        assert_eq!(
            info,
            Message::WmInfo {
                safehouse_index: 0,
                wine_volume: 3
            }
        );
        // rank 0 never sent an immediate WM_ACK to rank 1 (it deferred it),
        // so the deposit above had to happen without waiting on one.
        handle.abort();
    }
}
