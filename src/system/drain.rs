// src/system/drain.rs

//! Drain workers: background readers that move one child output stream into a sink.
//!
//! A drain runs on the runner's drain pool, never on its scheduling pool, so a worker waiting
//! for a child to exit can never starve the readers that keep that child's pipes moving.
//!
//! A drain only gives its slot back once its stream closes. Drains abandoned after a destroy may
//! hold a slot for as long as a grandchild keeps the pipe open, so once every slot is taken new
//! drains get a dedicated thread instead of queueing behind them.

use crate::core::sinks::SharedSink;
use crate::models::StreamKind;
use crate::system::errors::RunnerError;
use rayon::ThreadPool;
use std::any::Any;
use std::io::{self, BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Bounded pool of drain threads that overflows onto dedicated threads when every slot is busy.
pub(crate) struct DrainPool {
    pool: ThreadPool,
    name: String,
    busy: Arc<AtomicUsize>,
    overflowed: AtomicUsize,
}

impl DrainPool {
    /// Wraps `pool`; `name` prefixes the names of overflow threads.
    pub(crate) fn new(pool: ThreadPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            busy: Arc::new(AtomicUsize::new(0)),
            overflowed: AtomicUsize::new(0),
        }
    }

    /// Number of drains currently occupying a pool slot.
    pub(crate) fn busy(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of drains that ran on a dedicated thread so far.
    pub(crate) fn overflowed(&self) -> usize {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Claims a pool slot, failing when all of them are taken.
    fn claim(&self) -> bool {
        let capacity = self.pool.current_num_threads();
        self.busy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |busy| {
                (busy < capacity).then_some(busy + 1)
            })
            .is_ok()
    }

    fn execute<F>(&self, tag: &str, work: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.claim() {
            let busy = Arc::clone(&self.busy);
            self.pool.spawn(move || {
                let _slot = scopeguard::guard((), |_| {
                    busy.fetch_sub(1, Ordering::AcqRel);
                });
                work();
            });
            return Ok(());
        }
        let n = self.overflowed.fetch_add(1, Ordering::Relaxed);
        log::debug!("[{}] Drain pool saturated, reading on a dedicated thread.", tag);
        thread::Builder::new()
            .name(format!("{}-overflow-{}", self.name, n))
            .spawn(work)
            .map(|_| ())
    }
}

impl std::fmt::Debug for DrainPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainPool")
            .field("name", &self.name)
            .field("threads", &self.pool.current_num_threads())
            .field("busy", &self.busy())
            .field("overflowed", &self.overflowed())
            .finish()
    }
}

/// Completion handle of a drain worker.
#[derive(Debug)]
pub(crate) struct DrainHandle {
    stream: StreamKind,
    done: mpsc::Receiver<Result<u64, RunnerError>>,
}

impl DrainHandle {
    pub(crate) fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Blocks until the drain has read its stream to the end and yields the number of lines
    /// delivered to the sink. With a `limit`, gives up after that long and returns `None`; the
    /// drain itself keeps running until the stream closes.
    pub(crate) fn join_within(
        self,
        command: &str,
        limit: Option<Duration>,
    ) -> Option<Result<u64, RunnerError>> {
        let lost = || RunnerError::Sink {
            command: command.to_string(),
            stream: self.stream,
            message: "drain worker exited without reporting".to_string(),
        };
        match limit {
            None => Some(self.done.recv().unwrap_or_else(|_| Err(lost()))),
            Some(limit) => match self.done.recv_timeout(limit) {
                Ok(result) => Some(result),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(lost())),
            },
        }
    }
}

/// Everything a drain worker needs to read one stream.
pub(crate) struct DrainJob {
    pub(crate) tag: String,
    pub(crate) command: String,
    pub(crate) stream: StreamKind,
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) sink: SharedSink,
}

/// Schedules `job` on `pool` and returns its completion handle.
pub(crate) fn spawn_drain(pool: &DrainPool, job: DrainJob) -> Result<DrainHandle, RunnerError> {
    let (tx, rx) = mpsc::sync_channel(1);
    let stream = job.stream;
    let tag = job.tag.clone();
    let command = job.command.clone();
    pool.execute(&tag, move || {
        let result = run_drain(job);
        // The receiver may be gone if the task was torn down; nothing to report to then.
        let _ = tx.send(result);
    })
    .map_err(|e| RunnerError::io(&command, e))?;
    Ok(DrainHandle { stream, done: rx })
}

fn run_drain(job: DrainJob) -> Result<u64, RunnerError> {
    let DrainJob {
        tag,
        command,
        stream,
        reader,
        sink,
    } = job;
    log::trace!("[{}] {} drain attached.", tag, stream);

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut delivered = 0u64;
    let mut failure: Option<RunnerError> = None;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| RunnerError::io(&command, e))?;
        if read == 0 {
            break;
        }
        if failure.is_some() {
            // Keep the pipe moving so the child never blocks on a full buffer.
            continue;
        }
        let line = decode_line(&buf);
        log::trace!("[{}] {}: {}", tag, stream, line);
        match panic::catch_unwind(AssertUnwindSafe(|| sink.consume(&line))) {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => {
                log::debug!("[{}] {} handler failed: {:#}", tag, stream, e);
                failure = Some(RunnerError::Sink {
                    command: command.clone(),
                    stream,
                    message: format!("{:#}", e),
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::debug!("[{}] {} handler panicked: {}", tag, stream, message);
                failure = Some(RunnerError::Sink {
                    command: command.clone(),
                    stream,
                    message: format!("handler panicked: {}", message),
                });
            }
        }
    }

    log::trace!("[{}] {} drain finished after {} line(s).", tag, stream, delivered);
    match failure {
        Some(err) => Err(err),
        None => Ok(delivered),
    }
}

/// Strips the line terminator (`\n` or `\r\n`) and decodes lossily.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sinks::{BufferCollector, line_fn, sink_fn};
    use anyhow::anyhow;
    use rayon::ThreadPoolBuilder;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn pool() -> DrainPool {
        DrainPool::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap(), "test-drain")
    }

    fn job(text: &'static str, sink: SharedSink) -> DrainJob {
        DrainJob {
            tag: "test/1".to_string(),
            command: "cmd".to_string(),
            stream: StreamKind::Stdout,
            reader: Box::new(Cursor::new(text.as_bytes().to_vec())),
            sink,
        }
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"abc\n"), "abc");
        assert_eq!(decode_line(b"abc\r\n"), "abc");
        assert_eq!(decode_line(b"abc"), "abc");
        assert_eq!(decode_line(b"\xffx\n"), "\u{fffd}x");
    }

    #[test]
    fn test_drain_delivers_every_line_in_order() {
        let collector = Arc::new(BufferCollector::unbounded());
        let handle = spawn_drain(&pool(), job("a\nb\r\n\nlast", collector.clone())).unwrap();
        assert_eq!(handle.stream(), StreamKind::Stdout);
        assert_eq!(handle.join_within("cmd", None).unwrap().unwrap(), 4);
        assert_eq!(collector.text(), "a\nb\n\nlast\n");
    }

    #[test]
    fn test_sink_error_stops_delivery_but_reads_to_end() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            sink_fn(move |line| {
                seen.lock().unwrap().push(line.to_string());
                if line == "2" {
                    return Err(anyhow!("ccba900e"));
                }
                Ok(())
            })
        };
        let err = spawn_drain(&pool(), job("1\n2\n3\n", sink))
            .unwrap()
            .join_within("cmd", None)
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RunnerError::Sink { ref message, .. } if message.contains("ccba900e")));
        assert_eq!(*seen.lock().unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_sink_panic_is_reported_as_failure() {
        let sink = line_fn(|line| {
            if line == "boom" {
                panic!("sink exploded");
            }
        });
        let err = spawn_drain(&pool(), job("ok\nboom\n", sink))
            .unwrap()
            .join_within("cmd", Some(Duration::from_secs(10)))
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("sink exploded"));
    }

    #[test]
    fn test_join_within_gives_up_on_open_stream() {
        let (reader, _writer) = std::io::pipe().unwrap();
        let handle = spawn_drain(
            &pool(),
            DrainJob {
                tag: "test/2".to_string(),
                command: "cmd".to_string(),
                stream: StreamKind::Stderr,
                reader: Box::new(reader),
                sink: Arc::new(BufferCollector::unbounded()),
            },
        )
        .unwrap();
        assert!(handle.join_within("cmd", Some(Duration::from_millis(50))).is_none());
    }

    fn pipe_job(tag: &str, reader: std::io::PipeReader, sink: SharedSink) -> DrainJob {
        DrainJob {
            tag: tag.to_string(),
            command: "cmd".to_string(),
            stream: StreamKind::Stdout,
            reader: Box::new(reader),
            sink,
        }
    }

    #[test]
    fn test_stuck_drains_do_not_starve_new_ones() {
        let pool = pool();
        let (r1, w1) = std::io::pipe().unwrap();
        let (r2, w2) = std::io::pipe().unwrap();
        let stuck: Vec<DrainHandle> = [r1, r2]
            .into_iter()
            .map(|r| spawn_drain(&pool, pipe_job("test/stuck", r, Arc::new(BufferCollector::unbounded()))).unwrap())
            .collect();
        assert_eq!(pool.busy(), 2);

        let collector = Arc::new(BufferCollector::unbounded());
        let fresh = spawn_drain(&pool, job("x\ny\n", collector.clone())).unwrap();
        assert_eq!(
            fresh.join_within("cmd", Some(Duration::from_secs(10))).unwrap().unwrap(),
            2
        );
        assert_eq!(collector.text(), "x\ny\n");
        assert_eq!(pool.overflowed(), 1);

        drop((w1, w2));
        for handle in stuck {
            assert_eq!(handle.join_within("cmd", Some(Duration::from_secs(10))).unwrap().unwrap(), 0);
        }
    }

    #[test]
    fn test_slots_are_released_when_streams_close() {
        let pool = pool();
        for _ in 0..5 {
            spawn_drain(&pool, job("a\n", Arc::new(BufferCollector::unbounded())))
                .unwrap()
                .join_within("cmd", Some(Duration::from_secs(10)))
                .unwrap()
                .unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while pool.busy() > 0 && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(pool.busy(), 0);
        }
        assert_eq!(pool.overflowed(), 0);
    }
}
