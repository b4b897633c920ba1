//! Priority-DAG task scheduler.
//!
//! The [`PriorityScheduler`] runs a set of tasks on a fixed-size thread pool. Each task
//! names the tasks it depends on; a task becomes ready once all of them have finished,
//! including any continuations they attached through [`TaskHandle::augment`]. Among ready
//! tasks the highest priority runs first, ties going to the lowest task index, so a
//! single-threaded run is deterministic.
//!
//! The first failing task aborts the run: no further task starts, and the error is returned
//! once the running tasks have drained.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Mutex;
//! use redex::compiler::{PriorityScheduler, TaskSpec};
//!
//! // 0 depends on 1 and 2; 2 depends on 1.
//! let tasks = vec![
//!     TaskSpec::new(3, vec![1, 2]),
//!     TaskSpec::new(1, vec![]),
//!     TaskSpec::new(2, vec![1]),
//! ];
//! let order = Mutex::new(Vec::new());
//! PriorityScheduler::new(1).run(&tasks, |id, _| {
//!     order.lock().unwrap().push(id);
//!     Ok(())
//! })?;
//! assert_eq!(order.into_inner().unwrap(), vec![1, 2, 0]);
//! # Ok::<(), redex::Error>(())
//! ```

use std::{
    cell::RefCell,
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Condvar, Mutex,
    },
};

use crate::{Error, Result};

/// One task: its priority and the tasks that must finish first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    /// Larger runs earlier among ready tasks.
    pub priority: u64,
    /// Indices of the tasks this one waits for.
    pub dependencies: Vec<usize>,
}

impl TaskSpec {
    /// Creates a task specification.
    #[must_use]
    pub fn new(priority: u64, dependencies: Vec<usize>) -> Self {
        Self {
            priority,
            dependencies,
        }
    }
}

type Continuation<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// Lets a running task attach more work to itself.
pub struct TaskHandle<'a> {
    id: usize,
    continuations: RefCell<Vec<Continuation<'a>>>,
}

impl<'a> TaskHandle<'a> {
    /// Index of the running task.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Attaches `work`, which runs after the task body and before any dependent starts.
    pub fn augment(&self, work: impl FnOnce() -> Result<()> + Send + 'a) {
        self.continuations.borrow_mut().push(Box::new(work));
    }

    fn drain(&self) -> Result<()> {
        loop {
            let pending = std::mem::take(&mut *self.continuations.borrow_mut());
            if pending.is_empty() {
                return Ok(());
            }
            for work in pending {
                work()?;
            }
        }
    }
}

#[derive(Default)]
struct Queue {
    ready: BinaryHeap<(u64, Reverse<usize>)>,
    running: usize,
}

struct RunState<'t> {
    tasks: &'t [TaskSpec],
    dependents: Vec<Vec<usize>>,
    waits: Vec<AtomicUsize>,
    remaining: AtomicUsize,
    aborted: AtomicBool,
    failure: Mutex<Option<Error>>,
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl RunState<'_> {
    fn abort(&self, error: Error) {
        let mut failure = lock!(self.failure);
        if failure.is_none() {
            *failure = Some(error);
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.wakeup.notify_all();
    }

    /// Blocks until a task is ready; `None` once the run is over.
    fn next(&self) -> Result<Option<usize>> {
        let mut queue = self.queue.lock().map_err(|_| Error::LockError)?;
        loop {
            if self.aborted.load(Ordering::SeqCst) || self.remaining.load(Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            if let Some((_, Reverse(id))) = queue.ready.pop() {
                queue.running += 1;
                return Ok(Some(id));
            }
            if queue.running == 0 {
                return Err(Error::Scheduler(format!(
                    "{} tasks wait on a dependency cycle",
                    self.remaining.load(Ordering::SeqCst)
                )));
            }
            queue = self.wakeup.wait(queue).map_err(|_| Error::LockError)?;
        }
    }

    fn finish(&self, id: usize) -> Result<()> {
        let mut queue = self.queue.lock().map_err(|_| Error::LockError)?;
        for &dependent in &self.dependents[id] {
            if self.waits[dependent].fetch_sub(1, Ordering::SeqCst) == 1 {
                queue
                    .ready
                    .push((self.tasks[dependent].priority, Reverse(dependent)));
            }
        }
        queue.running -= 1;
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        self.wakeup.notify_all();
        Ok(())
    }

    fn worker<'a, F>(&self, work: &F) -> Result<()>
    where
        F: Fn(usize, &TaskHandle<'a>) -> Result<()> + Sync,
    {
        while let Some(id) = self.next()? {
            let handle = TaskHandle {
                id,
                continuations: RefCell::new(Vec::new()),
            };
            work(id, &handle)
                .and_then(|()| handle.drain())
                .map_err(|e| Error::Scheduler(format!("task {id}: {e}")))?;
            self.finish(id)?;
        }
        Ok(())
    }
}

/// Runs dependent tasks in priority order on a thread pool.
#[derive(Debug, Clone, Copy)]
pub struct PriorityScheduler {
    threads: usize,
}

impl PriorityScheduler {
    /// Creates a scheduler using `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `work` once for every task index, respecting dependencies.
    ///
    /// Continuations attached through the [`TaskHandle`] may borrow anything that outlives
    /// the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduler`] if a dependency index is out of range, if the
    /// dependencies form a cycle, or if a task or one of its continuations fails.
    pub fn run<'a, F>(&self, tasks: &[TaskSpec], work: F) -> Result<()>
    where
        F: Fn(usize, &TaskHandle<'a>) -> Result<()> + Sync,
    {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut dependents = vec![Vec::new(); tasks.len()];
        let mut waits = Vec::with_capacity(tasks.len());
        let mut queue = Queue::default();
        for (id, task) in tasks.iter().enumerate() {
            let mut deps = task.dependencies.clone();
            deps.sort_unstable();
            deps.dedup();
            for &dep in &deps {
                if dep >= tasks.len() || dep == id {
                    return Err(Error::Scheduler(format!("task {id} has invalid dependency {dep}")));
                }
                dependents[dep].push(id);
            }
            if deps.is_empty() {
                queue.ready.push((task.priority, Reverse(id)));
            }
            waits.push(AtomicUsize::new(deps.len()));
        }

        let state = RunState {
            tasks,
            dependents,
            waits,
            remaining: AtomicUsize::new(tasks.len()),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            queue: Mutex::new(queue),
            wakeup: Condvar::new(),
        };

        let workers = self.threads.min(tasks.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Scheduler(e.to_string()))?;
        pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| {
                    if let Err(error) = state.worker(&work) {
                        state.abort(error);
                    }
                });
            }
        });

        if let Some(error) = lock!(state.failure).take() {
            return Err(error);
        }
        log::debug!("scheduler: {} tasks on {workers} workers", tasks.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Mutex};

    #[test]
    fn test_dependencies_before_dependents() {
        // A chain 0 <- 1 <- ... <- 9 plus independent tasks.
        let mut tasks: Vec<TaskSpec> = (0..10)
            .map(|i| TaskSpec::new(0, if i == 0 { vec![] } else { vec![i - 1] }))
            .collect();
        tasks.extend((0..20).map(|_| TaskSpec::new(0, vec![])));
        let finished: Vec<AtomicUsize> = (0..tasks.len()).map(|_| AtomicUsize::new(0)).collect();
        let clock = AtomicUsize::new(1);
        PriorityScheduler::new(4)
            .run(&tasks, |id, _| {
                for &dep in &tasks[id].dependencies {
                    assert_ne!(finished[dep].load(Ordering::SeqCst), 0);
                }
                finished[id].store(clock.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(finished.iter().all(|f| f.load(Ordering::SeqCst) > 0));
    }

    #[test]
    fn test_priority_order_single_thread() {
        let tasks = vec![
            TaskSpec::new(1, vec![]),
            TaskSpec::new(5, vec![]),
            TaskSpec::new(5, vec![]),
            TaskSpec::new(9, vec![0]),
        ];
        let order = Mutex::new(Vec::new());
        PriorityScheduler::new(1)
            .run(&tasks, |id, _| {
                order.lock().unwrap().push(id);
                Ok(())
            })
            .unwrap();
        assert_eq!(order.into_inner().unwrap(), vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_augment_runs_before_dependents() {
        let tasks = vec![TaskSpec::new(0, vec![]), TaskSpec::new(0, vec![0])];
        let log = Mutex::new(Vec::new());
        PriorityScheduler::new(2)
            .run(&tasks, |id, handle| {
                log.lock().unwrap().push(format!("run {id}"));
                if id == 0 {
                    let log = &log;
                    handle.augment(move || {
                        log.lock().unwrap().push("continuation".to_string());
                        Ok(())
                    });
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(
            log.into_inner().unwrap(),
            vec!["run 0", "continuation", "run 1"]
        );
    }

    #[test]
    fn test_failure_aborts() {
        let tasks = vec![TaskSpec::new(0, vec![]), TaskSpec::new(0, vec![0])];
        let ran = AtomicUsize::new(0);
        let result = PriorityScheduler::new(2).run(&tasks, |id, _| {
            ran.fetch_add(1, Ordering::SeqCst);
            if id == 0 {
                return Err(Error::Error("boom".into()));
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::Scheduler(ref m)) if m.contains("boom")));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![
            TaskSpec::new(0, vec![1]),
            TaskSpec::new(0, vec![0]),
            TaskSpec::new(0, vec![]),
        ];
        let result = PriorityScheduler::new(1).run(&tasks, |_, _| Ok(()));
        assert!(matches!(result, Err(Error::Scheduler(_))));
        assert!(PriorityScheduler::new(1)
            .run(&[TaskSpec::new(0, vec![7])], |_, _| Ok(()))
            .is_err());
    }
}
