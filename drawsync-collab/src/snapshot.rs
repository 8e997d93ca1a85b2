//! Ordering snapshot the patch generator diffs against.

use std::collections::HashMap;

/// The page order and every page's cell order as of the last generated
/// patch. Attribute values are not kept: attribute changes are read from
/// mutation events instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// `None` until the first patch has been generated.
    pub order: Option<Vec<String>>,
    pub nested: HashMap<String, Vec<String>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_primed(&self) -> bool {
        self.order.is_some()
    }

    /// Forget everything; the next patch is a full refresh again.
    pub fn reset(&mut self) {
        self.order = None;
        self.nested.clear();
    }

    pub fn cells(&self, page_id: &str) -> &[String] {
        self.nested.get(page_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut snapshot = Snapshot::new();
        assert!(!snapshot.is_primed());

        snapshot.order = Some(vec!["a".into()]);
        snapshot.nested.insert("a".into(), vec!["0".into()]);
        assert!(snapshot.is_primed());
        assert_eq!(snapshot.cells("a"), ["0".to_string()]);
        assert!(snapshot.cells("b").is_empty());

        snapshot.reset();
        assert_eq!(snapshot, Snapshot::default());
    }
}
