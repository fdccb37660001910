use super::{ClusterError, Result};
use crate::pack::{pack_all, unpack_all, Packable};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::cell::{Cell, RefCell};
use std::thread;

/// Blocking collective exchange between the processes of a fleet
///
/// Every process must call the same collective operations in the same
/// order. There is no timeout: a process that never reaches an exchange
/// blocks the rest of the fleet.
pub trait Collective {
    /// This process's position in the fleet, `0..size()`
    fn rank(&self) -> usize;

    /// Number of processes in the fleet
    fn size(&self) -> usize;

    /// Contribute `bytes` and receive every process's contribution, indexed
    /// by rank
    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>>;
}

/// Pack `items`, all-gather them and unpack each rank's contribution
pub fn all_gather_items<T, C>(collective: &C, items: &[T]) -> Result<Vec<Vec<T>>>
where
    T: Packable,
    C: Collective + ?Sized,
{
    let gathered = collective.all_gather(pack_all(items)?)?;
    if gathered.len() != collective.size() {
        return Err(ClusterError::Transport(format!(
            "expected {} contributions, got {}",
            collective.size(),
            gathered.len()
        )));
    }
    gathered
        .iter()
        .map(|bytes| unpack_all(bytes).map_err(ClusterError::from))
        .collect()
}

/// Fleet of one process
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloCollective;

impl Collective for SoloCollective {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        Ok(vec![bytes])
    }
}

struct Envelope {
    round: u64,
    rank: usize,
    bytes: Vec<u8>,
}

/// One member of a [`LocalFleet`], owned by a single thread
pub struct FleetEndpoint {
    rank: usize,
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    round: Cell<u64>,
    early: RefCell<Vec<Envelope>>,
}

impl Collective for FleetEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let round = self.round.get();
        self.round.set(round + 1);

        for (rank, peer) in self.peers.iter().enumerate() {
            if let Some(sender) = peer {
                sender
                    .send(Envelope {
                        round,
                        rank: self.rank,
                        bytes: bytes.clone(),
                    })
                    .map_err(|_| {
                        ClusterError::Transport(format!("rank {} left the fleet", rank))
                    })?;
            }
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.size()];
        slots[self.rank] = Some(bytes);
        let mut missing = self.size() - 1;

        // peers can be at most one round ahead; their messages wait here
        let mut early = self.early.borrow_mut();
        let mut i = 0;
        while i < early.len() {
            if early[i].round == round {
                let env = early.swap_remove(i);
                slots[env.rank] = Some(env.bytes);
                missing -= 1;
            } else {
                i += 1;
            }
        }

        while missing > 0 {
            let env = self.inbox.recv().map_err(|_| {
                ClusterError::Transport(format!(
                    "rank {} lost its peers during round {}",
                    self.rank, round
                ))
            })?;
            if env.round == round {
                slots[env.rank] = Some(env.bytes);
                missing -= 1;
            } else {
                early.push(env);
            }
        }

        tracing::trace!(rank = self.rank, round, "all_gather complete");
        Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
    }
}

/// In-process fleet whose endpoints talk over crossbeam channels
pub struct LocalFleet;

impl LocalFleet {
    /// Create `size` connected endpoints, rank `i` at index `i`
    pub fn endpoints(size: usize) -> Vec<FleetEndpoint> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| FleetEndpoint {
                rank,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, s)| (peer != rank).then(|| s.clone()))
                    .collect(),
                inbox,
                round: Cell::new(0),
                early: RefCell::new(Vec::new()),
            })
            .collect()
    }

    /// Run `body` once per rank, each on its own thread, and collect the
    /// results in rank order
    pub fn run<R, F>(size: usize, body: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(FleetEndpoint) -> R + Sync,
    {
        let body = &body;
        thread::scope(|scope| {
            let handles: Vec<_> = Self::endpoints(size)
                .into_iter()
                .map(|endpoint| scope.spawn(move || body(endpoint)))
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| ClusterError::Transport(format!("rank {} panicked", rank)))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solo_all_gather() {
        let solo = SoloCollective;
        assert_eq!(solo.rank(), 0);
        assert_eq!(solo.size(), 1);
        assert_eq!(solo.all_gather(vec![1, 2]).unwrap(), vec![vec![1, 2]]);
    }

    #[test]
    fn test_local_fleet_gathers_in_rank_order() {
        let results = LocalFleet::run(4, |endpoint| {
            let mine = vec![endpoint.rank() as u8; endpoint.rank() + 1];
            endpoint.all_gather(mine).unwrap()
        })
        .unwrap();

        let expected: Vec<Vec<u8>> = (0..4).map(|r| vec![r as u8; r + 1]).collect();
        for gathered in results {
            assert_eq!(gathered, expected);
        }
    }

    #[test]
    fn test_many_rounds_stay_separated() {
        let results = LocalFleet::run(3, |endpoint| {
            (0..50u64)
                .map(|round| {
                    let got = all_gather_items(&endpoint, &[round * 10 + endpoint.rank() as u64])
                        .unwrap();
                    got.into_iter().flatten().collect::<Vec<u64>>()
                })
                .collect::<Vec<_>>()
        })
        .unwrap();

        for per_rank in results {
            for (round, values) in per_rank.iter().enumerate() {
                let r = round as u64;
                assert_eq!(values, &vec![r * 10, r * 10 + 1, r * 10 + 2]);
            }
        }
    }

    #[test]
    fn test_lost_peer_is_transport_error() {
        let mut endpoints = LocalFleet::endpoints(2);
        let survivor = endpoints.remove(0);
        drop(endpoints);
        assert!(matches!(
            survivor.all_gather(vec![1]),
            Err(ClusterError::Transport(_))
        ));
    }

    #[test]
    fn test_panicking_rank_reported() {
        let result = LocalFleet::run(2, |endpoint| {
            if endpoint.rank() == 1 {
                panic!("boom");
            }
            endpoint.rank()
        });
        assert!(matches!(result, Err(ClusterError::Transport(_))));
    }
}
