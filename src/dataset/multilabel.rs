//! Multi-label value type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A set of label indices, kept sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MultiLabel {
    labels: Vec<usize>,
}

impl MultiLabel {
    /// Build a multi-label from arbitrary indices.
    pub fn new(mut labels: Vec<usize>) -> Self {
        labels.sort_unstable();
        labels.dedup();
        Self { labels }
    }

    /// The empty label set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a presence indicator, `labels[l] == true` meaning label `l` is present.
    pub fn from_indicator(indicator: &[bool]) -> Self {
        Self {
            labels: indicator
                .iter()
                .enumerate()
                .filter_map(|(l, &on)| on.then_some(l))
                .collect(),
        }
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: usize) -> bool {
        self.labels.binary_search(&label).is_ok()
    }

    /// Largest label index, if any.
    pub fn max_label(&self) -> Option<usize> {
        self.labels.last().copied()
    }

    /// Dense 0/1 indicator of length `num_labels`. Labels `>= num_labels` are ignored.
    pub fn to_indicator(&self, num_labels: usize) -> Vec<f64> {
        let mut out = vec![0.0; num_labels];
        for &l in self.labels.iter().filter(|&&l| l < num_labels) {
            out[l] = 1.0;
        }
        out
    }
}

impl FromIterator<usize> for MultiLabel {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl From<Vec<usize>> for MultiLabel {
    fn from(labels: Vec<usize>) -> Self {
        Self::new(labels)
    }
}

impl fmt::Display for MultiLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{l}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_and_deduplicated() {
        let ml = MultiLabel::new(vec![3, 1, 3, 0]);
        assert_eq!(ml.labels(), &[0, 1, 3]);
        assert!(ml.contains(3));
        assert!(!ml.contains(2));
        assert_eq!(ml.max_label(), Some(3));
        assert_eq!(ml.to_string(), "{0, 1, 3}");
        assert_eq!(MultiLabel::empty().to_string(), "{}");
    }

    #[test]
    fn test_indicator_conversions() {
        let ml: MultiLabel = [2, 0].into_iter().collect();
        assert_eq!(ml.to_indicator(4), vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(MultiLabel::from_indicator(&[true, false, true]), ml);
        // out-of-range labels are dropped from the indicator
        assert_eq!(MultiLabel::new(vec![5]).to_indicator(2), vec![0.0, 0.0]);
    }
}
