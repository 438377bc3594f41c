//! Structural equality for record contents.
//!
//! Each entity type spells out which fields take part in comparison, so the
//! semantics stay auditable and independent of declaration order. Device
//! lists compare as multisets: the order reported by the provider does not
//! matter, duplicates do.

use crate::types::Device;

/// Field-by-field equality used by the reconciler.
pub trait SemanticEq<Rhs: ?Sized = Self> {
    /// Returns true if `self` and `other` are semantically equal.
    fn semantic_eq(&self, other: &Rhs) -> bool;
}

impl SemanticEq for Device {
    fn semantic_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.capacity == other.capacity
            && self.model == other.model
            && self.serial == other.serial
            && self.rotational == other.rotational
    }
}

impl SemanticEq for [Device] {
    fn semantic_eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        // Each device on the left must claim a distinct equal device on the right.
        let mut claimed = vec![false; other.len()];
        self.iter().all(|device| {
            let slot = other
                .iter()
                .enumerate()
                .position(|(idx, candidate)| !claimed[idx] && device.semantic_eq(candidate));
            match slot {
                Some(idx) => {
                    claimed[idx] = true;
                    true
                }
                None => false,
            }
        })
    }
}

/// Returns true if two device lists hold the same devices, in any order.
pub fn devices_equal(current: &[Device], desired: &[Device]) -> bool {
    current.semantic_eq(desired)
}
