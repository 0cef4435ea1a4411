use std::sync::Arc;

use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::common::topology::{LogicalThread, Topology};
use crate::error::{CoreflowError, Result};

/// Set of OS CPU numbers an execution context may run on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadMask {
    words: Vec<u64>,
}

impl ThreadMask {
    pub fn single(cpu: u32) -> Self {
        let mut mask = Self::default();
        mask.insert(cpu);
        mask
    }

    pub fn insert(&mut self, cpu: u32) {
        let word = (cpu / 64) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (cpu % 64);
    }

    pub fn contains(&self, cpu: u32) -> bool {
        self.words
            .get((cpu / 64) as usize)
            .is_some_and(|w| w & (1 << (cpu % 64)) != 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64u32)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| i as u32 * 64 + bit)
        })
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl FromIterator<u32> for ThreadMask {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut mask = Self::default();
        for cpu in iter {
            mask.insert(cpu);
        }
        mask
    }
}

/// OS affinity primitive for the calling execution context
pub trait Affinity: Send {
    fn get_affinity(&self) -> Result<ThreadMask>;
    fn set_affinity(&self, mask: &ThreadMask) -> Result<()>;
}

/// `sched_setaffinity(2)` on the calling OS thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedAffinity;

impl Affinity for SchedAffinity {
    fn get_affinity(&self) -> Result<ThreadMask> {
        let set = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| CoreflowError::AffinityError(format!("Failed to get affinity: {e}")))?;
        Ok((0..CpuSet::count())
            .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
            .map(|cpu| cpu as u32)
            .collect())
    }

    fn set_affinity(&self, mask: &ThreadMask) -> Result<()> {
        let mut set = CpuSet::new();
        for cpu in mask.iter() {
            set.set(cpu as usize).map_err(|e| {
                CoreflowError::AffinityError(format!("Failed to set CPU {cpu} in set: {e}"))
            })?;
        }
        sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| {
            CoreflowError::AffinityError(format!("Failed to set affinity to {mask:?}: {e}"))
        })
    }
}

/// Pins the calling context to one CPU and restores the previous mask on drop
pub struct AffinityGuard<'a> {
    affinity: &'a dyn Affinity,
    old_affinity: ThreadMask,
    cpu: u32,
}

impl<'a> AffinityGuard<'a> {
    pub fn new(affinity: &'a dyn Affinity, cpu: u32) -> Result<Self> {
        let old_affinity = affinity.get_affinity()?;
        affinity.set_affinity(&ThreadMask::single(cpu))?;
        tracing::debug!("Pinned to CPU {}", cpu);

        Ok(Self {
            affinity,
            old_affinity,
            cpu,
        })
    }
}

impl Drop for AffinityGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.affinity.set_affinity(&self.old_affinity) {
            tracing::warn!("Failed to restore affinity after CPU {}: {}", self.cpu, e);
        }
    }
}

/// Scoped pinning over a fixed topology
///
/// All methods take `&mut self`, so one controller never has two pins
/// outstanding. Pinning is a per-OS-thread property; the controller must
/// stay on the thread that drives the session.
pub struct AffinityController {
    affinity: Box<dyn Affinity>,
    topology: Arc<Topology>,
}

impl AffinityController {
    pub fn new(affinity: Box<dyn Affinity>, topology: Arc<Topology>) -> Self {
        Self { affinity, topology }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Run `body` pinned to exactly the logical thread `index`
    ///
    /// The previous affinity is restored on every exit path, including an
    /// error or panic in `body`.
    pub fn with_thread<R>(
        &mut self,
        index: usize,
        body: impl FnOnce(&LogicalThread) -> Result<R>,
    ) -> Result<R> {
        let thread = *self.topology.thread(index).ok_or_else(|| {
            CoreflowError::AffinityError(format!("Logical thread {index} does not exist"))
        })?;

        let _guard = AffinityGuard::new(self.affinity.as_ref(), thread.cpu)?;
        body(&thread)
    }

    /// Visit every logical thread in increasing index order, pinned to each
    ///
    /// Stops at the first error.
    pub fn for_each_thread(
        &mut self,
        mut body: impl FnMut(&LogicalThread) -> Result<()>,
    ) -> Result<()> {
        for index in 0..self.topology.thread_count() {
            self.with_thread(index, &mut body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAffinity;

    #[test]
    fn test_thread_mask_bits() {
        let mask: ThreadMask = [0, 5, 64, 130].into_iter().collect();
        assert!(mask.contains(64));
        assert!(!mask.contains(63));
        assert_eq!(mask.count(), 4);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 5, 64, 130]);
        assert!(ThreadMask::default().is_empty());
    }

    #[test]
    fn test_with_thread_restores_affinity() {
        let affinity = MockAffinity::new(&[0, 1, 2, 3]);
        let log = affinity.log();
        let topo = Arc::new(Topology::uniform(1, 2, 2).unwrap());
        let mut controller = AffinityController::new(Box::new(affinity), topo);

        let cpu = controller.with_thread(2, |t| Ok(t.cpu)).unwrap();
        assert_eq!(cpu, 2);

        let sets = log.lock().clone();
        assert_eq!(sets, vec![ThreadMask::single(2), [0, 1, 2, 3].into_iter().collect()]);
    }

    #[test]
    fn test_with_thread_restores_after_body_error() {
        let affinity = MockAffinity::new(&[0, 1]);
        let log = affinity.log();
        let topo = Arc::new(Topology::uniform(1, 2, 1).unwrap());
        let mut controller = AffinityController::new(Box::new(affinity), topo);

        let result: Result<()> = controller.with_thread(1, |_| {
            Err(CoreflowError::MsrError("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(log.lock().last(), Some(&[0, 1].into_iter().collect()));
    }

    #[test]
    fn test_for_each_thread_visits_in_index_order() {
        let affinity = MockAffinity::new(&[0, 1, 2, 3]);
        let topo = Arc::new(Topology::uniform(1, 2, 2).unwrap());
        let mut controller = AffinityController::new(Box::new(affinity), topo);

        let mut visited = Vec::new();
        controller
            .for_each_thread(|t| {
                visited.push(t.index);
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pin_failure_is_reported() {
        let affinity = MockAffinity::new(&[0, 1]).failing_on(1);
        let topo = Arc::new(Topology::uniform(1, 2, 1).unwrap());
        let mut controller = AffinityController::new(Box::new(affinity), topo);

        let err = controller.with_thread(1, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreflowError::AffinityError(_)));
        assert!(controller.with_thread(7, |_| Ok(())).is_err());
    }
}
