//! Change detection and update dispatch.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Point values, index-aligned to `start_address + index`.
///
/// `None` marks a point that has never been read. Shared by reference:
/// every publish replaces the whole vector.
pub type ValueVector = Arc<[Option<bool>]>;

/// What changed in a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// Treat the whole vector as new.
    FullRefresh,
    /// Only these indices changed, in ascending order.
    Changed(Vec<usize>),
}

impl ChangeSignal {
    /// Whether the point at `index` must be refreshed.
    pub fn affects(&self, index: usize) -> bool {
        match self {
            ChangeSignal::FullRefresh => true,
            ChangeSignal::Changed(indices) => indices.binary_search(&index).is_ok(),
        }
    }
}

/// One publish event.
#[derive(Debug, Clone)]
pub struct HubUpdate {
    pub signal: ChangeSignal,
    /// The vector as stored after this update.
    pub values: ValueVector,
}

/// Compares each new read against the last published vector.
#[derive(Debug)]
pub struct ChangeDetector {
    change_only: bool,
    values: ValueVector,
}

impl ChangeDetector {
    /// Start with `count` absent values.
    pub fn new(count: usize, change_only: bool) -> Self {
        Self {
            change_only,
            values: absent(count),
        }
    }

    pub fn values(&self) -> ValueVector {
        self.values.clone()
    }

    /// Feed a freshly read vector. Returns the signal to emit, or `None` when
    /// nothing needs publishing.
    pub fn publish(&mut self, new: &[bool]) -> Option<ChangeSignal> {
        let resized = self.values.len() != new.len();
        if resized {
            self.values = absent(new.len());
        }

        if !self.change_only {
            self.replace(new);
            return Some(ChangeSignal::FullRefresh);
        }

        if resized || self.values.iter().all(Option::is_none) {
            self.replace(new);
            return Some(ChangeSignal::FullRefresh);
        }

        let changed: Vec<usize> = self
            .values
            .iter()
            .zip(new)
            .enumerate()
            .filter(|(_, (old, new))| **old != Some(**new))
            .map(|(index, _)| index)
            .collect();

        if changed.is_empty() {
            return None;
        }

        self.replace(new);
        Some(ChangeSignal::Changed(changed))
    }

    fn replace(&mut self, new: &[bool]) {
        self.values = new.iter().copied().map(Some).collect();
    }
}

fn absent(count: usize) -> ValueVector {
    vec![None; count].into()
}

/// Owns the detector and the outbound channels: the value snapshot and the
/// update topic.
pub struct UpdatePublisher {
    detector: ChangeDetector,
    snapshot: watch::Sender<ValueVector>,
    updates: broadcast::Sender<HubUpdate>,
}

impl UpdatePublisher {
    pub fn new(
        detector: ChangeDetector,
        snapshot: watch::Sender<ValueVector>,
        updates: broadcast::Sender<HubUpdate>,
    ) -> Self {
        Self {
            detector,
            snapshot,
            updates,
        }
    }

    /// Run change detection and, if anything changed, swap the snapshot and
    /// notify subscribers. Returns whether an event was emitted.
    pub fn publish(&mut self, new: &[bool]) -> bool {
        let Some(signal) = self.detector.publish(new) else {
            return false;
        };

        let values = self.detector.values();
        self.snapshot.send_replace(values.clone());
        // No subscribers is fine: the snapshot still moves forward.
        let _ = self.updates.send(HubUpdate { signal, values });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: bool = true;
    const F: bool = false;

    fn stored(detector: &ChangeDetector) -> Vec<Option<bool>> {
        detector.values().to_vec()
    }

    #[test]
    fn test_first_read_is_full_refresh() {
        for change_only in [true, false] {
            let mut detector = ChangeDetector::new(4, change_only);
            assert_eq!(stored(&detector), vec![None; 4]);

            assert_eq!(detector.publish(&[T, F, F, T]), Some(ChangeSignal::FullRefresh));
            assert_eq!(stored(&detector), vec![Some(T), Some(F), Some(F), Some(T)]);
        }
    }

    #[test]
    fn test_change_only_scenario() {
        let mut detector = ChangeDetector::new(4, true);

        assert_eq!(detector.publish(&[T, F, F, T]), Some(ChangeSignal::FullRefresh));
        assert_eq!(detector.publish(&[T, F, F, T]), None);
        assert_eq!(
            detector.publish(&[T, T, F, T]),
            Some(ChangeSignal::Changed(vec![1]))
        );
        assert_eq!(stored(&detector), vec![Some(T), Some(T), Some(F), Some(T)]);
    }

    #[test]
    fn test_always_publish_without_change_only() {
        let mut detector = ChangeDetector::new(2, false);

        for _ in 0..3 {
            assert_eq!(detector.publish(&[F, F]), Some(ChangeSignal::FullRefresh));
        }
    }

    #[test]
    fn test_resize_forces_full_refresh() {
        let mut detector = ChangeDetector::new(4, true);
        detector.publish(&[T, T, T, T]);

        // Same prefix, different length: never a partial diff
        assert_eq!(detector.publish(&[T, T]), Some(ChangeSignal::FullRefresh));
        assert_eq!(stored(&detector), vec![Some(T), Some(T)]);

        assert_eq!(detector.publish(&[T, T]), None);
    }

    #[test]
    fn test_multiple_changes_in_order() {
        let mut detector = ChangeDetector::new(5, true);
        detector.publish(&[F, F, F, F, F]);

        assert_eq!(
            detector.publish(&[T, F, T, F, T]),
            Some(ChangeSignal::Changed(vec![0, 2, 4]))
        );
    }

    #[test]
    fn test_signal_affects() {
        let changed = ChangeSignal::Changed(vec![1, 3]);
        assert!(changed.affects(1));
        assert!(changed.affects(3));
        assert!(!changed.affects(2));
        assert!(!changed.affects(4));

        assert!(ChangeSignal::FullRefresh.affects(42));
    }

    #[tokio::test]
    async fn test_publisher_swaps_snapshot_and_notifies() {
        let (snapshot_tx, snapshot_rx) = watch::channel(absent(2));
        let (updates_tx, mut updates_rx) = broadcast::channel(8);
        let mut publisher =
            UpdatePublisher::new(ChangeDetector::new(2, true), snapshot_tx, updates_tx);

        assert!(publisher.publish(&[T, F]));
        assert!(!publisher.publish(&[T, F]));
        assert!(publisher.publish(&[F, F]));

        let first = updates_rx.recv().await.unwrap();
        assert_eq!(first.signal, ChangeSignal::FullRefresh);
        assert_eq!(first.values.to_vec(), vec![Some(T), Some(F)]);

        let second = updates_rx.recv().await.unwrap();
        assert_eq!(second.signal, ChangeSignal::Changed(vec![0]));
        assert!(updates_rx.try_recv().is_err());

        assert_eq!(snapshot_rx.borrow().to_vec(), vec![Some(F), Some(F)]);
    }

    #[test]
    fn test_publisher_without_subscribers() {
        let (snapshot_tx, snapshot_rx) = watch::channel(absent(1));
        let (updates_tx, _) = broadcast::channel(8);
        let mut publisher =
            UpdatePublisher::new(ChangeDetector::new(1, false), snapshot_tx, updates_tx);

        assert!(publisher.publish(&[T]));
        assert_eq!(snapshot_rx.borrow().to_vec(), vec![Some(T)]);
    }
}
