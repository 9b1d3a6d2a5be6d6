//! Scripted register transport for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::gateway::transport::{RegisterLink, RegisterTransport};

/// Transport whose connect outcomes, read results and write log are scripted
/// and observable from the test body.
pub(crate) struct MockTransport {
    connect_outcomes: Mutex<VecDeque<bool>>,
    connect_attempts: Arc<AtomicUsize>,
    reads: Arc<Mutex<VecDeque<Result<Vec<u16>>>>>,
    writes: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            connect_outcomes: Mutex::new(VecDeque::new()),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(Mutex::new(VecDeque::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue connect outcomes; once exhausted, connects succeed.
    pub(crate) fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.connect_outcomes.lock().unwrap().extend(outcomes);
    }

    /// Queue a register-read result; once exhausted, reads return six zeros.
    pub(crate) fn script_read(&self, result: Result<Vec<u16>>) {
        self.reads.lock().unwrap().push_back(result);
    }

    /// Observable connect-attempt counter.
    pub(crate) fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connect_attempts)
    }

    /// Observable (address, value) write log.
    pub(crate) fn writes(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        Arc::clone(&self.writes)
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn connect(&self) -> Result<Box<dyn RegisterLink>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .connect_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if !outcome {
            return Err(Error::Device("mock connect refused".into()));
        }
        Ok(Box::new(MockLink {
            reads: Arc::clone(&self.reads),
            writes: Arc::clone(&self.writes),
        }))
    }
}

struct MockLink {
    reads: Arc<Mutex<VecDeque<Result<Vec<u16>>>>>,
    writes: Arc<Mutex<Vec<(u16, u16)>>>,
}

#[async_trait]
impl RegisterLink for MockLink {
    async fn read_registers(&mut self, _address: u16, count: u16) -> Result<Vec<u16>> {
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![0; count as usize]))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.writes.lock().unwrap().push((address, value));
        Ok(())
    }
}
