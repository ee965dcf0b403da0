//! The station dispatch loop
//!
//! One cooperative loop drives everything. Each tick:
//!
//! 1. drain the scheduled-job queue (snapshot taken under the lock,
//!    executed afterwards, in arrival order);
//! 2. block on the input source for one window and obtain at most
//!    one symbol;
//! 3. tick the sequence accumulator and, if it appended a
//!    character, try a registry match and dispatch.
//!
//! Scheduled announcements and dialed commands therefore never run
//! concurrently, and nothing that happens during dispatch (handler
//! failures, timeouts, refused runs) stops the loop. The loop ends
//! only when the input source is exhausted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use log::{error, info, warn};

use dtmfrx::{
    Announcer, CommandExecutor, CommandGate, CommandRegistry, JobQueue, OtpStore,
    SequenceAccumulator, TickOutcome,
};

use crate::config::JobConfig;
use crate::input::{SourcePoll, SymbolSource};

/// Everything the dispatch loop needs, wired up by `main`
pub struct App {
    pub callsign: String,
    pub registry: CommandRegistry,
    pub otp: OtpStore,
    pub gate: CommandGate,
    pub accumulator: SequenceAccumulator,
    pub executor: CommandExecutor,
    pub announcer: Arc<dyn Announcer>,
    pub jobs: BTreeMap<String, JobConfig>,
    pub queue: JobQueue,
}

impl App {
    /// Run the dispatch loop until the input source closes
    pub fn run(&mut self, source: &mut dyn SymbolSource) {
        info!("station dispatch loop started");

        loop {
            self.run_scheduled_jobs();

            let symbol = match source.poll() {
                SourcePoll::Symbol(symbol) => Some(symbol),
                SourcePoll::Quiet => None,
                SourcePoll::Closed => break,
            };

            if let TickOutcome::Extended(sequence) = self.accumulator.tick(symbol) {
                info!("current sequence: {}", sequence);
                self.dispatch(&sequence);
            }
        }

        info!("input exhausted, stopping");
    }

    // Try to match and run the accumulated sequence
    fn dispatch(&mut self, sequence: &str) {
        let gate = &self.gate;
        let found = self
            .registry
            .find_match(sequence, &self.otp, &|id| gate.is_enabled(id));

        match found {
            Some(found) => {
                info!(
                    "found valid sequence \"{}\", invoking command \"{}\"",
                    sequence,
                    found.command.descriptor().id()
                );
                self.executor.run(found.command, found.data.as_deref());
                self.accumulator.complete();
            }
            None => {
                self.accumulator.prune();
            }
        }
    }

    // Run every job whose trigger fired since the previous tick
    fn run_scheduled_jobs(&self) {
        for job_id in self.queue.drain() {
            info!("running scheduled job: {}", job_id);

            let job = match self.jobs.get(&job_id) {
                Some(job) => job,
                None => {
                    warn!("unknown scheduled job: {}", job_id);
                    continue;
                }
            };

            let result = match job.action.as_str() {
                "say" => self.announcer.say(&self.render(&job.value)),
                "play" => self.announcer.play(&job.value),
                other => {
                    // unreachable after config validation
                    warn!("job {} has unknown action \"{}\"", job_id, other);
                    continue;
                }
            };

            if let Err(err) = result {
                error!("scheduled job {} failed: {}", job_id, err);
            }
        }
    }

    // Substitute announcement placeholders
    fn render(&self, text: &str) -> String {
        text.replace("{callsign}", &self.callsign)
            .replace("{time_local}", &Local::now().format("%H:%M").to_string())
            .replace("{time_utc}", &Utc::now().format("%H:%M").to_string())
    }
}
