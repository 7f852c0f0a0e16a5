use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Instantaneous rate with a guard for a zero (or garbage) interval, which
/// can happen when two samples land on the same timestamp.
pub fn instant_rate(delta_docs: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds <= 0.0 {
        return 0.0;
    }
    delta_docs as f64 / elapsed_seconds
}

/// Background sampler printing the instantaneous ingest rate. The loop
/// parks in `recv_timeout`, so a stop message lands within one interval
/// and `stop` joins the thread before the run is declared done.
pub struct RatePrinter {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl RatePrinter {
    pub fn start(progress: Arc<AtomicU64>, interval: Duration) -> Self {
        let (stop, stop_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || sample_loop(&progress, interval, &stop_rx));
        RatePrinter { stop, thread }
    }

    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            tracing::error!("rate printer thread panicked");
        }
    }
}

fn sample_loop(progress: &AtomicU64, interval: Duration, stop: &mpsc::Receiver<()>) {
    let started = Instant::now();
    let mut last_instant = started;
    let mut last_count = progress.load(Ordering::Relaxed);
    println!("ingest rate sampling started");
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let now = Instant::now();
        let count = progress.load(Ordering::Relaxed);
        let rate = instant_rate(count - last_count, (now - last_instant).as_secs_f64());
        println!("ingest: {rate:.1} docs/sec ({} ms)", (now - started).as_millis());
        last_instant = now;
        last_count = count;
    }
}
