//! Descriptor walk over the discovered characteristics
//!
//! Firmware announces each characteristic's logical endpoint name in an
//! attached descriptor. The walk reads those descriptors one at a time until
//! every characteristic either appears as a registry value or has been
//! attempted once. Marking a characteristic attempted at selection time is
//! what guarantees forward progress: a characteristic with no readable
//! descriptor is skipped on every later iteration, so the walk terminates in
//! at most one pass per characteristic.

use std::collections::{HashSet, VecDeque};

use provlink_core::EndpointRegistry;
use uuid::Uuid;

use crate::link::GattCharacteristic;

// ----------------------------------------------------------------------------
// Descriptor Walk
// ----------------------------------------------------------------------------

/// Sequential walk state over the service's characteristics
#[derive(Debug)]
pub struct DescriptorWalk {
    characteristics: Vec<GattCharacteristic>,
    attempted: HashSet<Uuid>,
    current: Option<Uuid>,
    pending: VecDeque<Uuid>,
}

impl DescriptorWalk {
    /// Start a walk over the characteristics enumerated on the service
    pub fn new(characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            characteristics,
            attempted: HashSet::new(),
            current: None,
            pending: VecDeque::new(),
        }
    }

    /// Next descriptor read to issue: `(characteristic, descriptor)`
    ///
    /// Drains the current characteristic's descriptors first, then selects
    /// the first characteristic that is neither a registry value nor already
    /// attempted. Returns `None` when the walk is complete.
    pub fn next_read(&mut self, registry: &EndpointRegistry) -> Option<(Uuid, Uuid)> {
        loop {
            if let Some(descriptor) = self.pending.pop_front() {
                // current is always set when pending is non-empty
                let characteristic = self.current?;
                return Some((characteristic, descriptor));
            }

            let next = self
                .characteristics
                .iter()
                .find(|c| {
                    !registry.contains_characteristic(c.uuid) && !self.attempted.contains(&c.uuid)
                })
                .cloned()?;

            self.attempted.insert(next.uuid);
            self.current = Some(next.uuid);
            self.pending = next.descriptors.into_iter().collect();
        }
    }

    /// Characteristics selected so far; bounded by the discovered count
    pub fn iterations(&self) -> usize {
        self.attempted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(uuid: u128, descriptors: &[u128]) -> GattCharacteristic {
        GattCharacteristic {
            uuid: Uuid::from_u128(uuid),
            descriptors: descriptors.iter().map(|&d| Uuid::from_u128(d)).collect(),
        }
    }

    #[test]
    fn walks_each_characteristic_once() {
        let mut registry = EndpointRegistry::new();
        let mut walk = DescriptorWalk::new(vec![ch(1, &[0x2901]), ch(2, &[0x2901])]);

        let (c1, d1) = walk.next_read(&registry).unwrap();
        assert_eq!(c1, Uuid::from_u128(1));
        assert_eq!(d1, Uuid::from_u128(0x2901));
        registry.insert("prov-session", c1);

        let (c2, _) = walk.next_read(&registry).unwrap();
        assert_eq!(c2, Uuid::from_u128(2));
        registry.insert("prov-config", c2);

        assert!(walk.next_read(&registry).is_none());
        assert_eq!(walk.iterations(), 2);
    }

    #[test]
    fn characteristic_without_descriptors_is_skipped_after_one_pass() {
        let registry = EndpointRegistry::new();
        let mut walk = DescriptorWalk::new(vec![ch(1, &[]), ch(2, &[])]);

        // Neither characteristic has anything to read; the walk must still
        // terminate rather than reselecting them forever.
        assert!(walk.next_read(&registry).is_none());
        assert_eq!(walk.iterations(), 2);
        assert!(walk.next_read(&registry).is_none());
    }

    #[test]
    fn unresolved_descriptor_does_not_stall_the_walk() {
        let mut registry = EndpointRegistry::new();
        let mut walk = DescriptorWalk::new(vec![ch(1, &[0x2901]), ch(2, &[0x2901])]);

        // First read fails upstream; nothing is inserted for ch 1
        let (c1, _) = walk.next_read(&registry).unwrap();
        assert_eq!(c1, Uuid::from_u128(1));

        // The walk moves on to ch 2 instead of retrying ch 1
        let (c2, _) = walk.next_read(&registry).unwrap();
        assert_eq!(c2, Uuid::from_u128(2));
        registry.insert("prov-session", c2);

        assert!(walk.next_read(&registry).is_none());
    }

    #[test]
    fn multiple_descriptors_drain_in_order() {
        let registry = EndpointRegistry::new();
        let mut walk = DescriptorWalk::new(vec![ch(1, &[0x2901, 0x2902])]);

        assert_eq!(
            walk.next_read(&registry),
            Some((Uuid::from_u128(1), Uuid::from_u128(0x2901)))
        );
        assert_eq!(
            walk.next_read(&registry),
            Some((Uuid::from_u128(1), Uuid::from_u128(0x2902)))
        );
        assert!(walk.next_read(&registry).is_none());
        assert_eq!(walk.iterations(), 1);
    }
}
