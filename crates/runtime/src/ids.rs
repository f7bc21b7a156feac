//! `(name, instance)` pairs attached to emitted blocks.

use bar_core::Segment;
use std::collections::{HashMap, HashSet};

/// Where a block of the last emitted line came from.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub slot: usize,
    pub segment: Segment,
}

/// The routing table of the most recent line.
#[derive(Debug, Default)]
pub(crate) struct IdTable {
    targets: HashMap<(String, String), Target>,
}

impl IdTable {
    pub fn get(&self, name: &str, instance: &str) -> Option<&Target> {
        self.targets.get(&(name.to_string(), instance.to_string()))
    }

    pub fn replace(&mut self, targets: HashMap<(String, String), Target>) {
        self.targets = targets;
    }
}

/// Name for every block of the module in `slot`.
pub(crate) fn slot_name(slot: usize) -> String {
    slot.to_string()
}

/// Instances for one module's segments: the segment's own identifier when
/// it has one and it is unique in the module, otherwise one derived from the
/// segment's position.
pub(crate) fn instances(segments: &[Segment]) -> Vec<String> {
    let mut taken = HashSet::new();
    segments
        .iter()
        .enumerate()
        .map(|(pos, seg)| match seg.get_identifier() {
            Some(id) if !id.starts_with('#') && taken.insert(id.to_string()) => id.to_string(),
            _ => format!("#{pos}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_identifiers_win_unless_repeated() {
        let segs = vec![
            Segment::text("a").identifier("cpu"),
            Segment::text("b"),
            Segment::text("c").identifier("cpu"),
            Segment::text("d").identifier("#1"),
        ];
        assert_eq!(instances(&segs), ["cpu", "#1", "#2", "#3"]);
    }

    #[test]
    fn lookup() {
        let mut table = IdTable::default();
        let mut targets = HashMap::new();
        targets.insert(
            (slot_name(1), "#0".to_string()),
            Target {
                slot: 1,
                segment: Segment::text("x"),
            },
        );
        table.replace(targets);
        assert_eq!(table.get("1", "#0").map(|t| t.slot), Some(1));
        assert!(table.get("0", "#0").is_none());
    }
}
