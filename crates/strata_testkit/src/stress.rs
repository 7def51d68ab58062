//! Multi-threaded load drivers.
//!
//! Drivers only count outcomes; the calling test decides what a correct run
//! looks like.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use strata_codec::Value;
use strata_core::{ObjectOperator, OperatorManager, QueueOperator, SearchOperator};

/// Thread count and per-thread workload of a run.
#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    /// Worker threads.
    pub threads: usize,
    /// Operations each worker attempts.
    pub ops_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 50,
            ops_per_thread: 200,
        }
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Default)]
pub struct StressReport {
    /// Calls that returned `Ok`.
    pub succeeded: usize,
    /// Calls that returned `Err`.
    pub failed: usize,
    /// Wall time from the first worker starting to the last one joining.
    pub elapsed: Duration,
}

impl StressReport {
    /// Completed calls per second, zero for an instantaneous run.
    #[allow(clippy::cast_precision_loss)]
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            (self.succeeded + self.failed) as f64 / secs
        }
    }
}

#[derive(Default)]
struct Tally {
    ok: AtomicUsize,
    err: AtomicUsize,
}

impl Tally {
    fn record<T, E>(&self, outcome: &Result<T, E>) {
        let counter = if outcome.is_ok() { &self.ok } else { &self.err };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    fn settled(&self) -> usize {
        self.ok.load(Ordering::Acquire) + self.err.load(Ordering::Acquire)
    }
}

/// Key thread `thread` writes on its `n`th insert. Ranges of different
/// threads never overlap.
pub fn disjoint_key(thread: usize, n: usize) -> i64 {
    (thread * 1_000_000 + n) as i64
}

/// Runs `work(i)` on `count` threads released together, returning each
/// thread's output in index order.
fn run_together<T, F>(count: usize, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let gate = Arc::new(Barrier::new(count));
    let work = Arc::new(work);
    let workers: Vec<_> = (0..count)
        .map(|i| {
            let gate = Arc::clone(&gate);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                gate.wait();
                work(i)
            })
        })
        .collect();
    workers
        .into_iter()
        .map(|worker| worker.join().expect("stress worker panicked"))
        .collect()
}

fn object(manager: &OperatorManager, name: &str) -> ObjectOperator {
    manager
        .get(name)
        .and_then(|handle| handle.into_object())
        .expect("object operator")
}

fn queue(manager: &OperatorManager, name: &str) -> QueueOperator {
    manager
        .get(name)
        .and_then(|handle| handle.into_queue())
        .expect("queue operator")
}

/// Every thread puts its own [`disjoint_key`] range into the `long`-keyed
/// object operator `name`.
///
/// # Panics
///
/// Panics if `name` is not an object operator.
pub fn stress_disjoint_inserts(
    manager: &Arc<OperatorManager>,
    name: &str,
    config: &StressConfig,
) -> StressReport {
    let tally = Arc::new(Tally::default());
    let ops = config.ops_per_thread;
    let started = Instant::now();
    run_together(config.threads, {
        let tally = Arc::clone(&tally);
        let items = object(manager, name);
        move |t| {
            for n in 0..ops {
                let doc = Value::document([("thread", t as i64), ("n", n as i64)]);
                tally.record(&items.put(&[Value::from(disjoint_key(t, n))], doc));
            }
        }
    });
    StressReport {
        succeeded: tally.ok.load(Ordering::Acquire),
        failed: tally.err.load(Ordering::Acquire),
        elapsed: started.elapsed(),
    }
}

/// The first half of the threads offer `ops_per_thread` jobs each to queue
/// `name`; the rest pop until every offered job is accounted for. Returns
/// the report and every popped document.
///
/// # Panics
///
/// Panics if `name` is not a queue.
pub fn stress_queue(
    manager: &Arc<OperatorManager>,
    name: &str,
    config: &StressConfig,
) -> (StressReport, Vec<Value>) {
    let producers = (config.threads / 2).max(1);
    let consumers = config.threads.saturating_sub(producers).max(1);
    let ops = config.ops_per_thread;
    let expected = producers * ops;

    let offers = Arc::new(Tally::default());
    let pops = Arc::new(Tally::default());
    let started = Instant::now();
    let outputs = run_together(producers + consumers, {
        let (offers, pops) = (Arc::clone(&offers), Arc::clone(&pops));
        let jobs = queue(manager, name);
        move |i| {
            let mut popped = Vec::new();
            if i < producers {
                for n in 0..ops {
                    let job = Value::document([("producer", i as i64), ("n", n as i64)]);
                    offers.record(&jobs.offer(job));
                }
                return popped;
            }
            // Failed offers never reach the queue, so stop once pops and
            // failed offers cover every attempt.
            while pops.settled() + offers.err.load(Ordering::Acquire) < expected {
                match jobs.pop() {
                    Ok(None) => thread::yield_now(),
                    Ok(Some(doc)) => {
                        pops.ok.fetch_add(1, Ordering::AcqRel);
                        popped.push(doc);
                    }
                    Err(_) => {
                        pops.err.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
            popped
        }
    });

    let popped: Vec<Value> = outputs.into_iter().flatten().collect();
    let report = StressReport {
        succeeded: offers.ok.load(Ordering::Acquire) + popped.len(),
        failed: offers.err.load(Ordering::Acquire) + pops.err.load(Ordering::Acquire),
        elapsed: started.elapsed(),
    };
    (report, popped)
}
