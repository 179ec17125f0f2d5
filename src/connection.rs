//! C7 (write state machine), C8 (read state machine) and C9 (connection
//! orchestrator) — kept in one module because they share so much mutable
//! state, but with every transition table kept as an explicit enum +
//! if/else chain. The two state machines are deliberately not folded into
//! one: keeping them separate is what makes depth and rate policies
//! independently testable.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, RealClock};
use crate::descriptor::OperationDescriptor;
use crate::distributions::{InterArrival, KeyGenerator, SizeDistribution};
use crate::error::PacerError;
use crate::operation::{Method, Operation};
use crate::options::Options;
use crate::protocol::{classify_status, Classification, RequestSpec, ResponseEvent, Transport};
use crate::queue::OperationQueue;
use crate::stats::ConnectionStats;

/// Minimum gap between the most recent response and the next issue under
/// `moderate`.
const MODERATE_GAP_SECS: f64 = 0.000_25;
/// Backlog threshold that triggers skip-ahead catch-up.
const SKIP_TRIGGER_SECS: f64 = 0.005;
/// How close to `now` skip-ahead advances `next_time` to.
const SKIP_TARGET_SECS: f64 = 0.004;
/// Loader pre-flight chunk size.
const LOADER_CHUNK: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    InitWrite,
    WaitingForTime,
    Issuing,
    WaitingForOpq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    InitRead,
    Idle,
    WaitingForGet,
    WaitingForPost,
    Loading,
    ConnSetup,
}

/// One connection's worth of the request-driving engine: C4–C8 state plus
/// the wiring (C9) that owns it.
pub struct Connection {
    transport: Arc<dyn Transport>,

    host: String,
    host_header: String,
    path: String,
    headers: HashMap<String, String>,

    options: Options,
    clock: Box<dyn Clock>,
    rng: StdRng,

    keygen: KeyGenerator,
    valuesize: SizeDistribution,
    iagen: InterArrival,

    queue: OperationQueue,
    stats: ConnectionStats,

    write_state: WriteState,
    read_state: ReadState,

    start_time: f64,
    next_time: f64,
    last_tx: f64,
    last_rx: f64,
    next_seq: u64,

    timer: Option<Pin<Box<Sleep>>>,
    /// Cancelled by `stop()` — checked at every `check_exit_condition` call
    /// and raced against the timer/response wakeups in `run()` so a
    /// `stop()` from another task takes effect promptly even while blocked
    /// in `select!`.
    cancel: CancellationToken,

    loader_issued: u64,
    loader_completed: u64,

    response_tx: mpsc::UnboundedSender<Result<ResponseEvent, PacerError>>,
    response_rx: mpsc::UnboundedReceiver<Result<ResponseEvent, PacerError>>,
    /// Responses that arrived before their operation reached the front of
    /// the queue — holds them until it's their turn, since per-connection
    /// request-response order must stay FIFO even though requests run as
    /// independent tasks.
    pending: HashMap<u64, ResponseEvent>,
}

impl Connection {
    /// Construct a connection for one `(operation_desc, options)` pair.
    /// DNS resolution happens here, synchronously — the one permitted
    /// blocking call; everything after construction is non-blocking.
    pub fn new(
        transport: Arc<dyn Transport>,
        descriptor: &OperationDescriptor,
        options: Options,
        sampling: bool,
        seed: u64,
    ) -> Result<Self, PacerError> {
        options.validate()?;

        let host = descriptor.host()?;
        let port = descriptor.port_number()?;
        // Validated even though issuance picks GET/POST from `options.update`
        // rather than the descriptor's `method` field — a malformed
        // descriptor method is still a configuration error worth catching
        // at construction.
        let _ = descriptor.resolved_method()?;

        (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|source| PacerError::DnsFailure {
                hostname: host.clone(),
                source,
            })?;

        let keysize = SizeDistribution::parse(&options.keysize)?;
        let valuesize = SizeDistribution::parse(&options.valuesize)?;
        let keygen = KeyGenerator::new(options.records, keysize);
        let iagen = InterArrival::new(&options.ia, options.lambda)?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();

        Ok(Self {
            transport,
            host_header: format!("{host}:{port}"),
            host,
            path: descriptor.path.clone(),
            headers: descriptor.headers.clone(),
            options,
            clock: Box::new(RealClock::new()),
            rng: StdRng::seed_from_u64(seed),
            keygen,
            valuesize,
            iagen,
            queue: OperationQueue::new(),
            stats: ConnectionStats::new(sampling),
            write_state: WriteState::InitWrite,
            read_state: ReadState::Idle,
            start_time: 0.0,
            next_time: 0.0,
            last_tx: 0.0,
            last_rx: 0.0,
            next_seq: 0,
            timer: None,
            cancel: CancellationToken::new(),
            loader_issued: 0,
            loader_completed: 0,
            response_tx,
            response_rx,
            pending: HashMap::new(),
        })
    }

    /// Inject a clock, for deterministic tests. Not needed in production use.
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    /// Receive the next completed response without driving the full
    /// `run()` loop — lets tests exercise `handle_response` directly with
    /// full control over ordering and timing.
    pub async fn recv_response(&mut self) -> Option<Result<ResponseEvent, PacerError>> {
        self.response_rx.recv().await
    }

    // -- C9: start / stop / reset ------------------------------------------

    /// Begin driving requests from `now`.
    pub fn start(&mut self, now: f64) -> Result<(), PacerError> {
        tracing::info!(host = %self.host, depth = self.options.depth, "connection starting");
        self.start_time = now;
        self.drive_write(Some(now))
    }

    /// Stop this connection's run loop at the next opportunity. Outstanding
    /// operations are abandoned, not counted as success or miss — the same
    /// posture as termination by `time` or `loadonly`.
    pub fn stop(&mut self) {
        tracing::info!(host = %self.host, ops = self.stats.ops, "connection stopping");
        self.cancel.cancel();
    }

    /// Return to a fresh initial state. Requires an empty queue.
    pub fn reset(&mut self) -> Result<(), PacerError> {
        if !self.queue.is_empty() {
            return Err(PacerError::InvariantViolation(
                "reset() called with a non-empty operation queue".to_string(),
            ));
        }
        self.timer = None;
        self.cancel = CancellationToken::new();
        self.read_state = ReadState::Idle;
        self.write_state = WriteState::InitWrite;
        self.stats = ConnectionStats::new(self.stats.sampling());
        self.pending.clear();
        self.next_time = 0.0;
        self.last_tx = 0.0;
        self.last_rx = 0.0;
        Ok(())
    }

    /// Pre-flight load phase: populate `options.records` keys before the
    /// measured run.
    pub fn start_loading(&mut self) -> Result<(), PacerError> {
        self.read_state = ReadState::Loading;
        self.loader_issued = 0;
        self.loader_completed = 0;

        let total = self.keygen.records();
        while self.loader_issued < LOADER_CHUNK.min(total) {
            self.issue_loader_request();
            self.loader_issued += 1;
        }
        Ok(())
    }

    /// Drive the event loop until `check_exit_condition` is satisfied or
    /// the response channel closes. One `tokio::select!` iteration handles
    /// exactly one of {timer fire, response arrival} — no two wakeups for
    /// the same connection may overlap.
    pub async fn run(&mut self) -> Result<(), PacerError> {
        loop {
            if self.check_exit_condition(self.clock.now()) {
                tracing::info!(ops = self.stats.ops, "connection run finished");
                return Ok(());
            }

            match self.timer.take() {
                Some(mut sleep) => {
                    tokio::select! {
                        _ = sleep.as_mut() => {
                            self.drive_write(None)?;
                        }
                        maybe_ev = self.response_rx.recv() => {
                            // A timer rearmed while pending is treated as
                            // already pending — put the still-unfired sleep
                            // back.
                            self.timer = Some(sleep);
                            match maybe_ev {
                                Some(ev) => self.handle_response(ev)?,
                                None => return Ok(()),
                            }
                        }
                        _ = self.cancel.cancelled() => {
                            self.timer = Some(sleep);
                        }
                    }
                }
                None => {
                    tokio::select! {
                        maybe_ev = self.response_rx.recv() => {
                            match maybe_ev {
                                Some(ev) => self.handle_response(ev)?,
                                None => return Ok(()),
                            }
                        }
                        _ = self.cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    fn check_exit_condition(&self, now: f64) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        if self.read_state == ReadState::InitRead {
            return false;
        }
        if now > self.start_time + self.options.time {
            return true;
        }
        if self.options.loadonly && self.read_state == ReadState::Idle {
            return true;
        }
        false
    }

    fn arm_timer(&mut self, delay: f64) {
        if self.timer.is_none() {
            let delay = Duration::from_secs_f64(delay.max(0.0));
            self.timer = Some(Box::pin(tokio::time::sleep(delay)));
        }
    }

    // -- C7: write state machine ------------------------------------------

    /// Decide whether to issue the next request. Idempotent with respect to
    /// spurious invocations.
    pub fn drive_write(&mut self, now: Option<f64>) -> Result<(), PacerError> {
        let now = now.unwrap_or_else(|| self.clock.now());

        if self.check_exit_condition(now) {
            return Ok(());
        }

        loop {
            match self.write_state {
                WriteState::InitWrite => {
                    let delay = self.iagen.next(&mut self.rng);
                    self.next_time = now + delay;
                    self.arm_timer(delay);
                    self.write_state = WriteState::WaitingForTime;
                }
                WriteState::WaitingForTime => {
                    if now < self.next_time {
                        self.arm_timer(self.next_time - now);
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }
                WriteState::Issuing => {
                    if self.queue.size() >= self.options.depth {
                        self.write_state = WriteState::WaitingForOpq;
                        return Ok(());
                    } else if now < self.next_time {
                        self.write_state = WriteState::WaitingForTime;
                    } else if self.options.moderate && now < self.last_rx + MODERATE_GAP_SECS {
                        self.write_state = WriteState::WaitingForTime;
                        self.arm_timer(self.last_rx + MODERATE_GAP_SECS - now);
                        return Ok(());
                    } else {
                        self.issue_something(now);
                        self.last_tx = now;
                        let queue_size = self.queue.size();
                        self.stats.log_op(queue_size);
                        self.next_time += self.iagen.next(&mut self.rng);

                        if self.options.skip
                            && self.options.lambda > 0.0
                            && now - self.next_time > SKIP_TRIGGER_SECS
                            && self.queue.size() >= self.options.depth
                        {
                            while self.next_time < now - SKIP_TARGET_SECS {
                                self.stats.skips += 1;
                                self.next_time += self.iagen.next(&mut self.rng);
                            }
                        }
                    }
                }
                WriteState::WaitingForOpq => {
                    if self.queue.size() >= self.options.depth {
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }
            }
        }
    }

    /// C7 helper: draw a key and method, construct the `Operation`, and
    /// hand it to the protocol adapter as a spawned task.
    fn issue_something(&mut self, now: f64) {
        let records = self.keygen.records();
        let index = self.rng.gen_range(0..records);
        let key = self.keygen.generate(index, &mut self.rng);

        let method = if self.rng.gen_bool(self.options.update) {
            Method::Post
        } else {
            Method::Get
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        self.queue.push(Operation::new(key, method, now, seq));

        if self.read_state == ReadState::Idle {
            self.read_state = match method {
                Method::Get => ReadState::WaitingForGet,
                Method::Post => ReadState::WaitingForPost,
            };
        }

        let body = match method {
            Method::Post => Some(vec![0u8; self.valuesize.generate(&mut self.rng)]),
            Method::Get => None,
        };

        self.stats.tx_bytes += estimate_request_size(method, &self.path, &self.headers, body.as_deref());

        self.dispatch(seq, method, body);
    }

    fn issue_loader_request(&mut self) {
        let key = self.keygen.generate(self.loader_issued, &mut self.rng);
        let seq = self.next_seq;
        self.next_seq += 1;
        let now = self.clock.now();

        self.queue.push(Operation::new(key, Method::Post, now, seq));

        let body = vec![0u8; self.valuesize.generate(&mut self.rng)];
        self.stats.tx_bytes += estimate_request_size(Method::Post, &self.path, &self.headers, Some(&body));
        self.dispatch(seq, Method::Post, Some(body));
    }

    fn dispatch(&self, seq: u64, method: Method, body: Option<Vec<u8>>) {
        let spec = RequestSpec {
            seq,
            method,
            url: format!("http://{}{}", self.host_header, self.path),
            host_header: self.host.clone(),
            headers: self.headers.clone(),
            body,
        };
        let transport = Arc::clone(&self.transport);
        let tx = self.response_tx.clone();
        tokio::spawn(async move {
            let ev = transport.send_request(spec).await;
            let _ = tx.send(ev);
        });
    }

    // -- C8: read state machine --------------------------------------------

    /// Consume one completed response. FIFO ordering is only promised at
    /// the state-machine boundary, not at the transport, so out-of-order
    /// arrivals are buffered in `pending` until their operation reaches the
    /// front of the queue.
    ///
    /// A transport-level `Err` (a mid-flight `TransportError`) is fatal
    /// regardless of queue position — it terminates the run immediately
    /// rather than waiting for its turn in `pending`, since ordering only
    /// matters for responses the run continues past.
    pub fn handle_response(&mut self, ev: Result<ResponseEvent, PacerError>) -> Result<(), PacerError> {
        let ev = ev?;
        self.pending.insert(ev.seq, ev);

        loop {
            let front_seq = match self.queue.front() {
                Some(op) => op.seq,
                None => return Ok(()),
            };
            let Some(ready) = self.pending.remove(&front_seq) else {
                return Ok(());
            };
            self.dispatch_response(ready)?;
        }
    }

    fn dispatch_response(&mut self, ev: ResponseEvent) -> Result<(), PacerError> {
        match self.read_state {
            ReadState::InitRead => Err(PacerError::InvariantViolation(
                "response observed while read_state == InitRead".to_string(),
            )),
            ReadState::Idle => {
                tracing::debug!("spurious read callback: no operation pending");
                Ok(())
            }
            ReadState::WaitingForGet | ReadState::WaitingForPost => self.classify_and_finish(ev),
            ReadState::Loading => self.handle_loading_response(ev),
            ReadState::ConnSetup => {
                self.read_state = ReadState::Idle;
                Ok(())
            }
        }
    }

    /// Response classification table: maps a status code to a `ConnectionRefused`
    /// / `Unknown` fatal, a recorded `Miss`, or a `Success`.
    fn classify_and_finish(&mut self, ev: ResponseEvent) -> Result<(), PacerError> {
        self.stats.rx_bytes += ev.rx_bytes;
        match classify_status(ev.status) {
            Classification::ConnectionRefused => {
                tracing::warn!(host = %self.host, "connection refused, aborting run");
                Err(PacerError::ConnectRefused)
            }
            Classification::Unknown => {
                tracing::warn!(host = %self.host, status = ev.status, "unknown response code, aborting run");
                Err(PacerError::UnknownStatus(ev.status))
            }
            Classification::Miss => {
                self.stats.get_misses += 1;
                tracing::debug!(status = ev.status, "protocol miss");
                self.finish_op()
            }
            Classification::Success => self.finish_op(),
        }
    }

    /// Mark completion, log, pop, re-drive the writer. This is the sole
    /// path by which a depth-blocked writer resumes.
    fn finish_op(&mut self) -> Result<(), PacerError> {
        let now = self.clock.now();
        {
            let op = self.queue.front_mut().ok_or_else(|| {
                PacerError::InvariantViolation("finish_op called on an empty queue".to_string())
            })?;
            op.finish(now);
        }
        let op = self.queue.front().expect("checked above").clone();
        match op.method {
            Method::Get => self.stats.log_get(&op),
            Method::Post => self.stats.log_post(&op),
        }
        self.last_rx = now;
        self.queue.pop();

        // At depth > 1 other ops can still be outstanding after this pop;
        // read_state must track whichever op is now at the front, not jump
        // to Idle, or the next arriving response gets treated as spurious
        // and its op is never popped.
        if self.read_state != ReadState::Loading {
            self.read_state = match self.queue.front() {
                Some(next) => match next.method {
                    Method::Get => ReadState::WaitingForGet,
                    Method::Post => ReadState::WaitingForPost,
                },
                None => ReadState::Idle,
            };
        }

        self.drive_write(Some(now))
    }

    fn handle_loading_response(&mut self, ev: ResponseEvent) -> Result<(), PacerError> {
        self.stats.rx_bytes += ev.rx_bytes;
        self.queue.pop();
        self.loader_completed += 1;

        let records = self.keygen.records();
        if self.loader_completed >= records {
            tracing::debug!("loader finished: {} records", records);
            self.read_state = ReadState::Idle;
            return Ok(());
        }

        while self.loader_issued < self.loader_completed + LOADER_CHUNK && self.loader_issued < records
        {
            self.issue_loader_request();
            self.loader_issued += 1;
        }
        Ok(())
    }
}

/// Approximate on-wire size of an outgoing request, for `stats.tx_bytes`.
fn estimate_request_size(
    method: Method,
    path: &str,
    headers: &HashMap<String, String>,
    body: Option<&[u8]>,
) -> u64 {
    let mut size = method.as_str().len() + 1 + path.len() + " HTTP/1.1\r\n".len();
    size += "Host: \r\n".len();
    size += "Connection: close\r\n".len();
    for (name, value) in headers {
        size += name.len() + value.len() + ": \r\n".len();
    }
    if let Some(body) = body {
        size += body.len();
    }
    size as u64
}
