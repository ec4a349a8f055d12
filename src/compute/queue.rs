use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    compute::task::{ComputeTask, TaskId},
    data::range::AmountRange,
};

/// Pending compute tasks, newest first.
///
/// Tasks are evicted once older than the staleness threshold and dropped as soon as they
/// finish, so abandoned viewport positions cannot grow the queue without bound.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<ComputeTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn push(&mut self, task: ComputeTask) {
        self.tasks.push_front(task);
    }

    pub fn get(&self, id: TaskId) -> Option<&ComputeTask> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputeTask> {
        self.tasks.iter()
    }

    /// Evicts tasks started more than `stale_after` before `now`. Returns how many.
    pub fn sweep(&mut self, now: Instant, stale_after: Duration) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| {
            let age = now.saturating_duration_since(t.started_at());
            let keep = age <= stale_after;
            if !keep {
                debug!(
                    task = %t.id(),
                    target = %t.target(),
                    age_secs = age.as_secs(),
                    "Stale task evicted"
                );
            }
            keep
        });
        before - self.tasks.len()
    }

    pub fn any_relevant(&self, range: AmountRange) -> bool {
        self.tasks.iter().any(|t| t.intersects(range))
    }

    /// Tasks concerned by `range`, newest first.
    pub fn relevant_mut(&mut self, range: AmountRange) -> impl Iterator<Item = &mut ComputeTask> {
        self.tasks.iter_mut().filter(move |t| t.intersects(range))
    }

    pub fn compact(&mut self) {
        self.tasks.retain(|t| !t.is_finished());
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::uid::Uid;

    fn task(id: u64, start: i64, at: Instant) -> ComputeTask {
        ComputeTask::new(
            TaskId(id),
            AmountRange::bounded(Uid::at(start), Uid::at(start + 10)),
            at,
        )
    }

    #[test]
    fn test_sweep_evicts_only_stale_tasks() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::new();
        queue.push(task(0, 0, t0));
        queue.push(task(1, 0, t0 + Duration::from_secs(30)));

        let evicted = queue.sweep(t0 + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(evicted, 1);
        assert!(queue.get(TaskId(0)).is_none(), "61s old task is gone");
        assert!(queue.get(TaskId(1)).is_some());
    }

    #[test]
    fn test_relevant_is_newest_first() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::new();
        queue.push(task(0, 0, t0));
        queue.push(task(1, 100, t0));
        queue.push(task(2, 5, t0));

        let range = AmountRange::bounded(Uid::at(8), Uid::at(9));
        let ids: Vec<_> = queue.relevant_mut(range).map(|t| t.id()).collect();
        assert_eq!(ids, vec![TaskId(2), TaskId(0)]);
        assert!(queue.any_relevant(range));
    }
}
