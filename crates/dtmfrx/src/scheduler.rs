//! Scheduled announcement jobs
//!
//! A [`JobScheduler`] runs on its own thread and does exactly one
//! thing when a job comes due: append the job's id to a shared,
//! mutex-guarded FIFO. It never calls into the dispatcher. The main
//! loop drains the queue at the top of every tick with
//! [`JobQueue::drain()`]: snapshot under the lock, release, then run
//! the snapshot in arrival order. Scheduled announcements and live
//! dialed commands are therefore always serialized on one thread,
//! and a burst of trigger firings cannot starve the dial loop for
//! longer than one snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};

#[cfg(not(test))]
use log::{debug, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;

/// Poll period of the scheduler thread
const SCHEDULER_TICK: Duration = Duration::from_millis(200);

/// When a job fires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobTrigger {
    /// Every `interval`, starting one interval after the scheduler
    /// starts
    Interval(Duration),

    /// Once per day at the given local time
    Daily(NaiveTime),
}

impl JobTrigger {
    // Time from now until the next firing
    fn time_to_next(&self) -> Duration {
        match self {
            JobTrigger::Interval(interval) => *interval,
            JobTrigger::Daily(at) => {
                let now = Local::now();
                let today = now.date_naive().and_time(*at);
                let target = if today > now.naive_local() {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };

                (target - now.naive_local())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Shared FIFO of due job ids
///
/// Cloning shares the underlying queue. The scheduler thread is the
/// only producer; the main loop is the only consumer.
#[derive(Clone, Debug, Default)]
pub struct JobQueue {
    pending: Arc<Mutex<Vec<String>>>,
}

impl JobQueue {
    /// New empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a due job id
    pub fn push<S: Into<String>>(&self, job_id: S) {
        let mut pending = self.pending.lock().unwrap_or_else(|err| err.into_inner());
        pending.push(job_id.into());
    }

    /// Take a snapshot of the pending ids, clearing the queue
    ///
    /// Ids are returned in arrival order. Ids pushed after the
    /// snapshot is taken are left for the next drain.
    pub fn drain(&self) -> Vec<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|err| err.into_inner());
        std::mem::take(&mut *pending)
    }
}

/// Background thread which enqueues due jobs
///
/// ```
/// use std::time::Duration;
/// use dtmfrx::{JobScheduler, JobTrigger};
///
/// let mut scheduler = JobScheduler::new();
/// scheduler.add_job("station_id", JobTrigger::Interval(Duration::from_secs(1800)));
///
/// let queue = scheduler.start().unwrap();
/// // … main loop: for job_id in queue.drain() { run it } …
/// scheduler.stop();
/// ```
#[derive(Debug, Default)]
pub struct JobScheduler {
    jobs: Vec<(String, JobTrigger)>,
    queue: JobQueue,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl JobScheduler {
    /// New scheduler with no jobs
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to fire per `trigger`
    ///
    /// Jobs must be added before [`start()`](JobScheduler::start).
    pub fn add_job<S: Into<String>>(&mut self, job_id: S, trigger: JobTrigger) {
        self.jobs.push((job_id.into(), trigger));
    }

    /// Queue the scheduler will feed
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Start the scheduler thread
    ///
    /// Returns the queue due jobs are appended to. Calling `start`
    /// twice is an error in the caller; the second call is ignored
    /// with a warning.
    pub fn start(&mut self) -> std::io::Result<JobQueue> {
        if self.worker.is_some() {
            warn!("scheduler is already running");
            return Ok(self.queue.clone());
        }

        let jobs = self.jobs.clone();
        let queue = self.queue.clone();
        let shutdown = Arc::clone(&self.shutdown);

        let worker = thread::Builder::new()
            .name("scheduler".to_owned())
            .spawn(move || run_scheduler(jobs, queue, shutdown))?;

        self.worker = Some(worker);
        Ok(self.queue.clone())
    }

    /// Stop the scheduler thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// Scheduler thread body: poll the due times and push ids
fn run_scheduler(jobs: Vec<(String, JobTrigger)>, queue: JobQueue, shutdown: Arc<AtomicBool>) {
    let mut next_fire: Vec<(String, JobTrigger, Instant)> = jobs
        .into_iter()
        .map(|(id, trigger)| {
            let due = Instant::now() + trigger.time_to_next();
            (id, trigger, due)
        })
        .collect();

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(SCHEDULER_TICK);

        let now = Instant::now();
        for (id, trigger, due) in next_fire.iter_mut() {
            if now >= *due {
                debug!("job {} is due", id);
                queue.push(id.clone());
                *due = now + trigger.time_to_next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_is_fifo_and_clears() {
        let queue = JobQueue::new();
        queue.push("first");
        queue.push("second");
        queue.push("third");

        assert_eq!(vec!["first", "second", "third"], queue.drain());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_drain_leaves_later_pushes() {
        let queue = JobQueue::new();
        queue.push("first");

        let snapshot = queue.drain();
        queue.push("second");

        assert_eq!(vec!["first"], snapshot);
        assert_eq!(vec!["second"], queue.drain());
    }

    #[test]
    fn test_interval_jobs_fire() {
        let mut scheduler = JobScheduler::new();
        scheduler.add_job("tick", JobTrigger::Interval(Duration::from_millis(250)));

        let queue = scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(1200));
        scheduler.stop();

        let fired = queue.drain();
        assert!(!fired.is_empty());
        assert!(fired.iter().all(|id| id == "tick"));
    }

    #[test]
    fn test_daily_trigger_is_within_a_day() {
        let trigger = JobTrigger::Daily(NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        let wait = trigger.time_to_next();
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
    }
}
