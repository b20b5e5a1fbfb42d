//! Lossy link simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides a [`Simulator`]: a one-directional link that holds
//! datagrams in flight and applies a configurable fault model:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.        |
//! | Reordering   | Hold a datagram `reorder_delay` extra ticks, letting |
//! |              | later ones overtake it.                              |
//! | Duplication  | Deliver a datagram twice.                            |
//! | Scripted     | Drop the next datagram matching a header filter.     |
//!
//! Time is counted in the same ticks the engine uses.  Randomness comes
//! from a seeded [`StdRng`], so a failing run replays exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::EngineError;
use crate::segment::Header;

/// Configuration for the fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back.
    pub reorder_rate: f64,
    /// Extra ticks a held-back datagram waits.
    pub reorder_delay: u32,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Ticks every datagram spends in flight.
    pub latency: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: 0,
            duplicate_rate: 0.0,
            latency: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, p) in [
            ("loss_rate", self.loss_rate),
            ("reorder_rate", self.reorder_rate),
            ("duplicate_rate", self.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EngineError::InvalidParameters(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// What the link did to the traffic so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStats {
    pub carried: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicated: u64,
}

type DropFilter = Box<dyn FnMut(&Header) -> bool + Send>;

/// A fault-injecting, one-directional datagram link.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    now: u64,
    /// `(due tick, datagram)` in transmission order.
    in_flight: Vec<(u64, Vec<u8>)>,
    scripted: Vec<DropFilter>,
    stats: LinkStats,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("config", &self.config)
            .field("now", &self.now)
            .field("in_flight", &self.in_flight.len())
            .field("scripted", &self.scripted.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Simulator {
    pub fn new(config: SimulatorConfig, seed: u64) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            now: 0,
            in_flight: Vec::new(),
            scripted: Vec::new(),
            stats: LinkStats::default(),
        })
    }

    /// A link that never drops, reorders, or duplicates.
    pub fn perfect() -> Self {
        Self {
            config: SimulatorConfig::default(),
            rng: StdRng::seed_from_u64(0),
            now: 0,
            in_flight: Vec::new(),
            scripted: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    /// Drop the next datagram whose header satisfies `filter`, once.
    pub fn drop_next(&mut self, filter: impl FnMut(&Header) -> bool + Send + 'static) {
        self.scripted.push(Box::new(filter));
    }

    /// Put a datagram on the link.
    pub fn transmit(&mut self, datagram: Vec<u8>) {
        if let Ok(header) = Header::peek(&datagram) {
            if let Some(i) = self.scripted.iter_mut().position(|f| f(&header)) {
                drop(self.scripted.swap_remove(i));
                log::debug!("[sim] scripted drop of seq={}", header.seq);
                self.stats.lost += 1;
                return;
            }
        }
        if self.rng.random_bool(self.config.loss_rate) {
            self.stats.lost += 1;
            return;
        }

        let mut due = self.now + u64::from(self.config.latency);
        if self.rng.random_bool(self.config.reorder_rate) {
            due += u64::from(self.config.reorder_delay);
            self.stats.reordered += 1;
        }
        if self.rng.random_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.in_flight.push((due, datagram.clone()));
        }
        self.stats.carried += 1;
        self.in_flight.push((due, datagram));
    }

    /// Remove and return every datagram due by now, in transmission order.
    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        let now = self.now;
        let (ready, held): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|(due, _)| *due <= now);
        self.in_flight = held;
        ready.into_iter().map(|(_, d)| d).collect()
    }

    /// Advance the link clock one tick.
    pub fn advance(&mut self) {
        self.now += 1;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumEngine;
    use crate::segment::{flags, Segment};
    use crate::seq::SequenceNumber;

    fn datagram(seq: u16) -> Vec<u8> {
        Segment::new(1, flags::DATA, 0, SequenceNumber(seq), SequenceNumber(0), vec![])
            .encode(&ChecksumEngine::strict())
    }

    #[test]
    fn perfect_link_passes_everything_in_order() {
        let mut link = Simulator::perfect();
        link.transmit(datagram(1));
        link.transmit(datagram(2));
        assert_eq!(link.deliver(), vec![datagram(1), datagram(2)]);
        assert!(link.deliver().is_empty());
    }

    #[test]
    fn latency_holds_datagrams() {
        let config = SimulatorConfig {
            latency: 2,
            ..Default::default()
        };
        let mut link = Simulator::new(config, 7).unwrap();
        link.transmit(datagram(1));
        assert!(link.deliver().is_empty());
        link.advance();
        assert!(link.deliver().is_empty());
        link.advance();
        assert_eq!(link.deliver().len(), 1);
    }

    #[test]
    fn scripted_drop_fires_once() {
        let mut link = Simulator::perfect();
        link.drop_next(|h| h.seq == SequenceNumber(5));
        link.transmit(datagram(5));
        link.transmit(datagram(5));
        assert_eq!(link.deliver(), vec![datagram(5)]);
        assert_eq!(link.stats().lost, 1);
    }

    #[test]
    fn scripted_drops_are_independent() {
        let mut link = Simulator::perfect();
        link.drop_next(|h| h.seq == SequenceNumber(1));
        link.drop_next(|h| h.seq == SequenceNumber(2));
        link.drop_next(|h| h.seq == SequenceNumber(3));
        for seq in [3, 1, 3, 2, 1, 2] {
            link.transmit(datagram(seq));
        }
        assert_eq!(link.deliver(), vec![datagram(3), datagram(1), datagram(2)]);
        assert_eq!(link.stats().lost, 3);
    }

    #[test]
    fn total_loss_drops_everything() {
        let config = SimulatorConfig {
            loss_rate: 1.0,
            ..Default::default()
        };
        let mut link = Simulator::new(config, 1).unwrap();
        for i in 0..10 {
            link.transmit(datagram(i));
        }
        assert!(link.deliver().is_empty());
        assert_eq!(link.stats().lost, 10);
    }

    #[test]
    fn same_seed_same_faults() {
        let config = SimulatorConfig {
            loss_rate: 0.3,
            duplicate_rate: 0.2,
            ..Default::default()
        };
        let run = |seed| {
            let mut link = Simulator::new(config.clone(), seed).unwrap();
            for i in 0..50 {
                link.transmit(datagram(i));
            }
            link.deliver()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn invalid_probability_rejected() {
        let config = SimulatorConfig {
            loss_rate: 1.5,
            ..Default::default()
        };
        assert!(Simulator::new(config, 0).is_err());
    }
}
