//! Execution contexts as task queues.
//!
//! A context is a single consumer draining boxed tasks in the order they
//! were posted. Posting never blocks. The cross-process transport uses one
//! queue per context: the producer's commit context receives its callbacks
//! here, so a surface is always called back where it committed.

use log::debug;
use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Posts tasks to a [`TaskQueue`].
#[derive(Debug, Clone)]
pub struct TaskRunner {
    sender: mpsc::UnboundedSender<Task>,
}

impl TaskRunner {
    /// Returns false if the queue is gone; the task is dropped unrun.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.sender.send(Box::new(task)).is_err() {
            debug!("task posted to a closed queue");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The consuming end of an execution context.
#[derive(Debug)]
pub struct TaskQueue {
    receiver: mpsc::UnboundedReceiver<Task>,
}

impl TaskQueue {
    /// Runs every task already queued and returns how many ran.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits for the next task and runs it. Returns false once every
    /// runner is dropped and the queue is empty.
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

pub fn task_queue() -> (TaskRunner, TaskQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (TaskRunner { sender }, TaskQueue { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn tasks_run_in_post_order() {
        let (runner, mut queue) = task_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            assert!(runner.post(move || seen.lock().unwrap().push(i)));
        }
        assert_eq!(queue.run_until_idle(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.run_until_idle(), 0);
    }

    #[test]
    fn posting_to_dropped_queue_fails() {
        let (runner, queue) = task_queue();
        drop(queue);
        assert!(runner.is_closed());
        assert!(!runner.post(|| {}));
    }

    #[tokio::test]
    async fn run_next_stops_when_runners_are_gone() {
        let (runner, mut queue) = task_queue();
        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        runner.post(move || *flag.lock().unwrap() = true);
        drop(runner);

        assert!(queue.run_next().await);
        assert!(*hit.lock().unwrap());
        assert!(!queue.run_next().await);
    }
}
