//! Owner-reference repair for DeviceNode records.

use devnode_common::OwnerReference;

/// Ensures `owner_refs` contains `required` with the required controller flag.
///
/// The first entry whose UID matches `required.uid` is authoritative: only
/// its controller flag is corrected, its other fields are left alone, and
/// later entries with the same UID are not inspected. If no entry matches,
/// `required` is appended verbatim.
///
/// Returns true if `owner_refs` was changed.
pub fn repair_owner_references(owner_refs: &mut Vec<OwnerReference>, required: &OwnerReference) -> bool {
    if let Some(existing) = owner_refs.iter_mut().find(|r| r.uid == required.uid) {
        if existing.controller == required.controller {
            return false;
        }
        existing.controller = required.controller;
        return true;
    }

    owner_refs.push(required.clone());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn required() -> OwnerReference {
        OwnerReference::controller_ref("v1", "Node", "node-1", "node-uid")
    }

    fn unrelated() -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "DaemonSet".to_string(),
            name: "device-node".to_string(),
            uid: "ds-uid".to_string(),
            controller: Some(false),
            block_owner_deletion: None,
        }
    }

    #[test]
    fn test_missing_owner_is_appended() {
        let mut refs = vec![unrelated()];
        assert!(repair_owner_references(&mut refs, &required()));
        assert_eq!(refs, vec![unrelated(), required()]);
    }

    #[test]
    fn test_empty_set_gets_owner() {
        let mut refs = vec![];
        assert!(repair_owner_references(&mut refs, &required()));
        assert_eq!(refs, vec![required()]);
    }

    #[test]
    fn test_controller_flag_corrected_only() {
        let mut drifted = required();
        drifted.controller = Some(false);
        drifted.kind = "OldKind".to_string();
        drifted.block_owner_deletion = None;
        let mut refs = vec![drifted.clone()];

        assert!(repair_owner_references(&mut refs, &required()));

        let mut expected = drifted;
        expected.controller = Some(true);
        assert_eq!(refs, vec![expected]);
    }

    #[test]
    fn test_absent_flag_counts_as_mismatch() {
        let mut drifted = required();
        drifted.controller = None;
        let mut refs = vec![drifted];

        assert!(repair_owner_references(&mut refs, &required()));
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn test_correct_owner_unchanged() {
        let mut refs = vec![unrelated(), required()];
        assert!(!repair_owner_references(&mut refs, &required()));
        assert_eq!(refs, vec![unrelated(), required()]);
    }

    #[test]
    fn test_first_uid_match_wins() {
        let mut second = required();
        second.controller = Some(false);
        let mut refs = vec![required(), second.clone()];

        assert!(!repair_owner_references(&mut refs, &required()));
        assert_eq!(refs[1], second);
    }
}
