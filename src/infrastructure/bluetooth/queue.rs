//! Operation Queue
//!
//! FIFO of pending transport operations with a single in-flight slot. The
//! next operation only starts once the current one has completed.

use crate::domain::error::SessionError;
use crate::domain::models::Channel;
use crate::infrastructure::bluetooth::transport::{OperationId, RequestKind};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Raw completion delivered to whoever submitted an operation.
pub type OperationResult = Result<Vec<u8>, SessionError>;
pub type Responder = oneshot::Sender<OperationResult>;

#[derive(Debug)]
pub struct Operation {
    pub id: OperationId,
    pub channel: Channel,
    pub kind: RequestKind,
    responder: Option<Responder>,
}

impl Operation {
    /// Deliver the outcome. Consumes the operation so it can only happen once.
    pub fn finish(mut self, result: OperationResult) {
        if let Some(responder) = self.responder.take() {
            // Originator may have stopped waiting.
            let _ = responder.send(result);
        }
    }
}

#[derive(Debug)]
pub struct OperationQueue {
    pending: VecDeque<Operation>,
    in_flight: Option<Operation>,
    next_id: u64,
    limit: Option<usize>,
}

impl OperationQueue {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            next_id: 1,
            limit,
        }
    }

    /// Append an operation. Fails (and notifies the responder) when the queue is at its limit.
    pub fn submit(
        &mut self,
        channel: Channel,
        kind: RequestKind,
        responder: Option<Responder>,
    ) -> Result<OperationId, SessionError> {
        if let Some(limit) = self.limit {
            if self.pending.len() >= limit {
                let err = SessionError::QueueSaturated { limit };
                if let Some(responder) = responder {
                    let _ = responder.send(Err(err.clone()));
                }
                return Err(err);
            }
        }

        let id = OperationId(self.next_id);
        self.next_id += 1;
        trace!("Queued {:?} {:?} on {}", id, kind, channel);
        self.pending.push_back(Operation {
            id,
            channel,
            kind,
            responder,
        });
        Ok(id)
    }

    /// Move the head of the queue into the in-flight slot, if the slot is free.
    pub fn start_next(&mut self) -> Option<&Operation> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        debug!("Starting {:?} on {}", next.id, next.channel);
        self.in_flight = Some(next);
        self.in_flight.as_ref()
    }

    /// Take the in-flight operation back out without a transport completion,
    /// e.g. when the backend refused to start it.
    pub fn abort_in_flight(&mut self) -> Option<Operation> {
        self.in_flight.take()
    }

    /// Release the in-flight slot for `id`. Unknown ids return `None`.
    pub fn complete(&mut self, id: OperationId) -> Option<Operation> {
        debug_assert!(
            !self.pending.iter().any(|op| op.id == id),
            "completion for {id:?} which was never started"
        );
        match &self.in_flight {
            Some(op) if op.id == id => self.in_flight.take(),
            _ => None,
        }
    }

    /// Fail the in-flight operation and everything queued behind it.
    pub fn drain(&mut self, error: &SessionError) -> usize {
        let mut drained = 0;
        if let Some(op) = self.in_flight.take() {
            op.finish(Err(error.clone()));
            drained += 1;
        }
        while let Some(op) = self.pending.pop_front() {
            op.finish(Err(error.clone()));
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} operations: {}", drained, error);
        }
        drained
    }

    pub fn in_flight(&self) -> Option<&Operation> {
        self.in_flight.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}
