use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use super::constants::{TAG_BROADCAST, TAG_GATHER};
use super::error::CommunicationError;

/// Message passing between the workers of a distributed build.
///
/// Point-to-point messages are blocking, rank addressed and tag matched. The collectives
/// are built on top of them and must be entered by every rank.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, dest: usize, tag: u32, payload: Vec<u8>) -> Result<(), CommunicationError>;

    /// Block until a message with `tag` arrives from `source`
    fn receive(&mut self, source: usize, tag: u32) -> Result<Vec<u8>, CommunicationError>;

    fn check_rank(&self, rank: usize) -> Result<(), CommunicationError> {
        if rank >= self.size() {
            Err(CommunicationError::InvalidRank(rank, self.size()))
        } else {
            Ok(())
        }
    }

    /// Receive a message which must be exactly `expected_len` bytes long
    fn receive_exact(
        &mut self,
        source: usize,
        tag: u32,
        expected_len: usize,
    ) -> Result<Vec<u8>, CommunicationError> {
        let payload = self.receive(source, tag)?;
        if payload.len() != expected_len {
            return Err(CommunicationError::SizeMismatch {
                source_rank: source,
                expected: expected_len,
                received: payload.len(),
            });
        }
        Ok(payload)
    }

    /// Collect one payload from every rank on `root`.
    ///
    /// The root gets every payload in rank order; the other ranks get None.
    fn gather(
        &mut self,
        root: usize,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<Vec<u8>>>, CommunicationError> {
        self.check_rank(root)?;
        if self.rank() != root {
            self.send(root, TAG_GATHER, payload)?;
            return Ok(None);
        }
        let mut gathered = Vec::with_capacity(self.size());
        let mut own = Some(payload);
        for source in 0..self.size() {
            if source == root {
                gathered.push(own.take().unwrap_or_default());
            } else {
                gathered.push(self.receive(source, TAG_GATHER)?);
            }
        }
        Ok(Some(gathered))
    }

    /// Distribute the root's payload to every rank. The payload given on the other ranks
    /// is ignored.
    fn broadcast(&mut self, root: usize, payload: Vec<u8>) -> Result<Vec<u8>, CommunicationError> {
        self.check_rank(root)?;
        if self.rank() != root {
            return self.receive(root, TAG_BROADCAST);
        }
        for dest in (0..self.size()).filter(|dest| *dest != root) {
            self.send(dest, TAG_BROADCAST, payload.clone())?;
        }
        Ok(payload)
    }
}

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: u32,
    payload: Vec<u8>,
}

/// In-process communicator: each rank is an endpoint of a group of channels, typically
/// driven from its own thread.
///
/// Every ordered pair of ranks has its own channel, so a receive from a rank whose
/// endpoint was dropped fails as soon as that rank's queued messages are used up.
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    /// Indexed by destination rank
    peers: Vec<Sender<Envelope>>,
    /// Indexed by source rank
    inboxes: Vec<Receiver<Envelope>>,
    pending: VecDeque<Envelope>,
    timeout: Duration,
}

impl LocalCommunicator {
    /// Create `size` connected endpoints, in rank order. A receive waiting longer than
    /// `timeout` fails.
    pub fn create_group(size: usize, timeout: Duration) -> Vec<Self> {
        let mut senders: Vec<Vec<Sender<Envelope>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Envelope>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for source in 0..size {
            for dest in 0..size {
                let (tx, rx) = channel();
                senders[source].push(tx);
                receivers[dest].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (peers, inboxes))| Self {
                rank,
                peers,
                inboxes,
                pending: VecDeque::new(),
                timeout,
            })
            .collect()
    }

    fn take_pending(&mut self, source: usize, tag: u32) -> Option<Vec<u8>> {
        let position = self
            .pending
            .iter()
            .position(|env| env.source == source && env.tag == tag)?;
        self.pending.remove(position).map(|env| env.payload)
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: u32, payload: Vec<u8>) -> Result<(), CommunicationError> {
        let peer = self
            .peers
            .get(dest)
            .ok_or(CommunicationError::InvalidRank(dest, self.peers.len()))?;
        peer.send(Envelope {
            source: self.rank,
            tag,
            payload,
        })
        .map_err(|_| CommunicationError::PeerUnreachable(dest))
    }

    fn receive(&mut self, source: usize, tag: u32) -> Result<Vec<u8>, CommunicationError> {
        self.check_rank(source)?;
        if let Some(payload) = self.take_pending(source, tag) {
            return Ok(payload);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inboxes[source].recv_timeout(remaining) {
                Ok(env) if env.tag == tag => return Ok(env.payload),
                Ok(env) => self.pending.push_back(env),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CommunicationError::Timeout {
                        source_rank: source,
                        tag,
                        secs: self.timeout.as_secs(),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommunicationError::PeerUnreachable(source))
                }
            }
        }
    }
}
