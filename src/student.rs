//! Student core: selecting a non-empty safehouse, acquiring exclusive
//! drain-rights, consuming (possibly partial) demand, optionally announcing
//! the safehouse is empty, then looping until demand is satisfied. This is
//! the larger of the two role state machines, since a student globally
//! contends against every other student rather than a `rank mod H` subset.

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
    Selecting,
    Requesting,
    Consuming,
}

/// A request deferred because the sender lost the tie: enough to both grant
/// it later (`ST_ACK` needs the safehouse and the requester's own
/// timestamp) and to track who it came from.
struct Deferred {
    peer: Rank,
    safehouse_index: u32,
    request_ts: Timestamp,
}

pub struct Student<O> {
    rank: Rank,
    student_count: u32,
    clock: LamportClock,
    supplies: Vec<u64>,
    last_req_ts: Timestamp,
    ack_count: u32,
    pending_acks: VecDeque<Deferred>,
    demand: u64,
    phase: Phase,
    oracle: O,
}

impl<O: VolumeOracle> Student<O> {
    pub fn new(config: &Config, rank: Rank, oracle: O) -> Self {
        assert!(config.student_ranks().contains(&rank), "rank {rank} is not a student");
        Self {
            rank,
            student_count: config.student_count,
            clock: LamportClock::new(),
            supplies: vec![0; config.safehouse_count as usize],
            last_req_ts: Timestamp::ZERO,
            ack_count: 0,
            pending_acks: VecDeque::new(),
            demand: 0,
            phase: Phase::Idle,
            oracle,
        }
    }

    /// Runs the outer cycle forever.
    pub async fn run(mut self, config: Config, mut transport: Transport) -> anyhow::Result<()> {
        loop {
            if self.demand == 0 {
                self.demand = self.oracle.sample();
                self.clock.tick();
                debug!(rank = self.rank, demand = self.demand, "generated new demand");
            }
            while self.demand > 0 {
                self.phase = Phase::Selecting;
                let target = self.select(&mut transport).await?;

                self.phase = Phase::Requesting;
                self.request(&config, &transport, target)?;
                if self.await_grants(&mut transport, target).await? {
                    // abandoned: targeted safehouse turned out empty mid-wait.
                    continue;
                }

                self.phase = Phase::Consuming;
                self.consume(&config, &mut transport, target)?;
                self.release(&transport)?;
                self.phase = Phase::Idle;
            }
        }
    }

    /// Step 2a: scan for the first non-empty safehouse, blocking on `recv`
    /// (and servicing peer `ST_REQ`s) until one shows up.
    async fn select(&mut self, transport: &mut Transport) -> anyhow::Result<u32> {
        loop {
            if let Some(index) = self.first_nonempty() {
                return Ok(index);
            }
            let (source, ts, message) = transport.recv().await?;
            self.clock.observe(ts);
            match message {
                Message::WmInfo {
                    safehouse_index,
                    wine_volume,
                } => {
                    self.supplies[safehouse_index as usize] = wine_volume;
                }
                Message::StReq { safehouse_index, .. } => {
                    // not requesting anything ourselves yet: grant
                    // unconditionally, without touching `supplies` (a peer
                    // may still abandon this request).
                    self.send_ack(transport, source, safehouse_index as u32, ts)?;
                }
                Message::StAck { .. } => {
                    // stale ACK from an earlier, already-finished round.
                }
                other => warn!(rank = self.rank, ?other, "protocol misuse: unexpected message while selecting"),
            }
        }
    }

    fn first_nonempty(&self) -> Option<u32> {
        self.supplies.iter().position(|&supply| supply > 0).map(|i| i as u32)
    }

    fn request(&mut self, config: &Config, transport: &Transport, target: u32) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.phase == Phase::Requesting,
            "protocol misuse: student {} requested while {:?}",
            self.rank,
            self.phase
        );
        let ts = self.clock.tick();
        self.last_req_ts = ts;
        self.ack_count = 0;
        debug!(rank = self.rank, ts = ts.0, safehouse = target, demand = self.demand, "ST_REQ");
        transport.broadcast(
            config.student_ranks().filter(|&r| r != self.rank),
            ts,
            &Message::StReq {
                safehouse_index: target as u64,
                wine_volume: self.demand,
            },
        )
    }

    /// Waits for grants. Returns `true` if the acquisition was abandoned
    /// via the preemption escape hatch and the caller should restart at
    /// selection instead of proceeding to consume.
    async fn await_grants(&mut self, transport: &mut Transport, target: u32) -> anyhow::Result<bool> {
        let needed = self.student_count - 1;
        while self.ack_count < needed {
            let (source, ts, message) = transport.recv().await?;
            self.clock.observe(ts);
            match message {
                Message::StAck { request_ts, .. } if Timestamp(request_ts) == self.last_req_ts => {
                    self.ack_count += 1;
                }
                Message::StAck { .. } => {
                    // stale ACK echoing a timestamp from a prior, abandoned
                    // round: dropped.
                }
                Message::StReq { safehouse_index, .. } => {
                    self.handle_peer_request(transport, source, ts, safehouse_index as u32, target)?
                }
                Message::WmInfo {
                    safehouse_index,
                    wine_volume,
                } => {
                    self.supplies[safehouse_index as usize] = wine_volume;
                    if self.supplies[target as usize] == 0 {
                        debug!(rank = self.rank, safehouse = target, "abandoning acquisition: target went empty");
                        self.abandon(transport)?;
                        return Ok(true);
                    }
                }
                other => warn!(rank = self.rank, ?other, "protocol misuse: unexpected message while requesting"),
            }
        }
        Ok(false)
    }

    fn handle_peer_request(
        &mut self,
        transport: &Transport,
        peer: Rank,
        peer_ts: Timestamp,
        safehouse_index: u32,
        target: u32,
    ) -> anyhow::Result<()> {
        if safehouse_index != target {
            return self.send_ack(transport, peer, safehouse_index, peer_ts);
        }
        let peer_priority = Priority::new(peer_ts, peer);
        let our_priority = Priority::new(self.last_req_ts, self.rank);
        if peer_priority < our_priority {
            self.send_ack(transport, peer, safehouse_index, peer_ts)
        } else {
            self.pending_acks.push_back(Deferred {
                peer,
                safehouse_index,
                request_ts: peer_ts,
            });
            self.ack_count += 1;
            Ok(())
        }
    }

    fn send_ack(
        &mut self,
        transport: &Transport,
        dest: Rank,
        safehouse_index: u32,
        request_ts: Timestamp,
    ) -> anyhow::Result<()> {
        let ts = self.clock.tick();
        transport.send(
            dest,
            ts,
            &Message::StAck {
                safehouse_index: safehouse_index as u64,
                request_ts: request_ts.0,
            },
        )
    }

    /// Abandonment escape hatch: grant every peer we'd deferred for this
    /// round, then reset bookkeeping so the caller can restart selection.
    fn abandon(&mut self, transport: &Transport) -> anyhow::Result<()> {
        self.flush_pending_acks(transport)?;
        self.ack_count = 0;
        Ok(())
    }

    fn consume(&mut self, config: &Config, transport: &mut Transport, target: u32) -> anyhow::Result<()> {
        self.clock.tick();
        let take = self.demand.min(self.supplies[target as usize]);
        self.supplies[target as usize] -= take;
        self.demand -= take;
        info!(rank = self.rank, safehouse = target, take, remaining_demand = self.demand, "consumed");
        if self.supplies[target as usize] == 0 {
            let ts = self.clock.tick();
            debug!(rank = self.rank, ts = ts.0, safehouse = target, "ST_INFO");
            transport.broadcast(config.winemaker_ranks(), ts, &Message::StInfo { safehouse_index: target as u64 })?;
        }
        Ok(())
    }

    fn release(&mut self, transport: &Transport) -> anyhow::Result<()> {
        self.flush_pending_acks(transport)
    }

    fn flush_pending_acks(&mut self, transport: &Transport) -> anyhow::Result<()> {
        while let Some(deferred) = self.pending_acks.pop_front() {
            self.send_ack(transport, deferred.peer, deferred.safehouse_index, deferred.request_ts)?;
        }
        Ok(())
    }
}
