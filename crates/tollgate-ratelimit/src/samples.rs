//! Fixed-capacity sample window.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserialize, Deserializer, SeqAccess, Visitor};
use serde::ser::{Serialize, Serializer};

/// Ring buffer holding the most recent `N` samples; the oldest is evicted
/// on insert past capacity.
///
/// Serialized as a plain sequence, oldest first. Deserializing a longer
/// sequence keeps only the newest `N` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow<T, const N: usize> {
    items: VecDeque<T>,
}

impl<T, const N: usize> Default for SampleWindow<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> SampleWindow<T, N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: VecDeque::with_capacity(N),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, item: T) {
        if N == 0 {
            return;
        }
        if self.items.len() == N {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn latest_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    /// Samples, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Serialize, const N: usize> Serialize for SampleWindow<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.items)
    }
}

struct WindowVisitor<T, const N: usize>(PhantomData<T>);

impl<'de, T: Deserialize<'de>, const N: usize> Visitor<'de> for WindowVisitor<T, N> {
    type Value = SampleWindow<T, N>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "a sequence of at most {N} samples")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut window = SampleWindow::new();
        while let Some(item) = seq.next_element()? {
            window.push(item);
        }
        Ok(window)
    }
}

impl<'de, T: Deserialize<'de>, const N: usize> Deserialize<'de> for SampleWindow<T, N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(WindowVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut window: SampleWindow<u32, 3> = SampleWindow::new();
        for i in 1..=5 {
            window.push(i);
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(window.latest(), Some(&5));
    }

    #[test]
    fn test_deserialize_keeps_newest() {
        let window: SampleWindow<u32, 2> = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(serde_json::to_string(&window).unwrap(), "[2,3]");
    }
}
