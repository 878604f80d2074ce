//! One control session: requests in, queued responses out.

use super::handlers;
use crate::cancel::CancellationToken;
use crate::config::ControlConfig;
use crate::error::{Result, RinaError};
use crate::registry::Registry;
use crate::wire::{peek_header, CtrlMessage};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SessionQueue {
    responses: Mutex<VecDeque<Bytes>>,
    ready: Condvar,
}

impl SessionQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A control session bound to a registry.
///
/// Every accepted request produces exactly one response, queued before
/// [`submit`](Self::submit) returns. Responses are read back in order with
/// [`receive`](Self::receive), which blocks while the queue is empty.
#[derive(Debug)]
pub struct ControlSession {
    registry: Arc<Registry>,
    queue: Arc<SessionQueue>,
}

impl ControlSession {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            queue: Arc::new(SessionQueue::default()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one serialized request. Returns the number of bytes consumed.
    ///
    /// Length, type and body are all validated before the registry is
    /// touched; a rejected request queues nothing.
    pub fn submit(&self, request: &[u8]) -> Result<usize> {
        if request.len() < ControlConfig::HEADER_SIZE
            || request.len() > ControlConfig::MAX_MESSAGE_SIZE
        {
            warn!("Rejecting control message of {} bytes", request.len());
            return Err(RinaError::bad_message(format!(
                "message length {} outside {}..={}",
                request.len(),
                ControlConfig::HEADER_SIZE,
                ControlConfig::MAX_MESSAGE_SIZE
            )));
        }

        let (msg_type, event_id) = peek_header(request)?;
        let Some(handler) = handlers::lookup(msg_type) else {
            warn!("Rejecting control message type {}", msg_type);
            return Err(RinaError::Unsupported { msg_type });
        };

        let msg = CtrlMessage::deserialize(request)?;
        debug!("Dispatching {} (event {})", msg.msg_type(), event_id);

        let response = handler(&self.registry, msg)?.serialize()?;
        let mut responses = self.queue.lock();
        responses.push_back(response);
        self.queue.ready.notify_all();

        Ok(request.len())
    }

    /// Dequeue the oldest response, waiting while there is none.
    ///
    /// A response larger than `capacity` stays queued and
    /// [`RinaError::InsufficientBuffer`] reports its size. Cancelling `cancel`
    /// wakes the wait with [`RinaError::Cancelled`]; a queued response is
    /// still returned in preference to the cancellation.
    pub fn receive(&self, capacity: usize, cancel: &CancellationToken) -> Result<Bytes> {
        let queue = Arc::clone(&self.queue);
        let _waker = cancel.on_cancel(move || {
            // Taking the lock orders the wakeup after the waiter's check.
            let _guard = queue.lock();
            queue.ready.notify_all();
        });

        let mut responses = self.queue.lock();
        loop {
            if let Some(head) = responses.front() {
                if head.len() > capacity {
                    return Err(RinaError::InsufficientBuffer {
                        needed: head.len(),
                        available: capacity,
                    });
                }
                if let Some(head) = responses.pop_front() {
                    return Ok(head);
                }
            }
            cancel.check()?;
            responses = self
                .queue
                .ready
                .wait(responses)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking form of [`receive`](Self::receive).
    pub fn try_receive(&self, capacity: usize) -> Result<Bytes> {
        let mut responses = self.queue.lock();
        match responses.front() {
            None => Err(RinaError::WouldBlock),
            Some(head) if head.len() > capacity => Err(RinaError::InsufficientBuffer {
                needed: head.len(),
                available: capacity,
            }),
            Some(_) => responses.pop_front().ok_or(RinaError::WouldBlock),
        }
    }

    /// Number of responses waiting to be read.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DifType;
    use crate::name::ProcessName;
    use crate::wire::MessageType;
    use std::thread;
    use std::time::Duration;

    fn session() -> ControlSession {
        ControlSession::new(Arc::new(Registry::with_default_factories().unwrap()))
    }

    fn create(event_id: u32, name: &str) -> Bytes {
        CtrlMessage::CreateIpcp {
            event_id,
            dif_type: DifType::NORMAL,
            name: ProcessName::process(name),
        }
        .serialize()
        .unwrap()
    }

    #[test]
    fn test_submit_queues_one_response() {
        let session = session();
        let req = create(5, "a.IPC");
        assert_eq!(session.submit(&req).unwrap(), req.len());
        assert_eq!(session.pending(), 1);

        let resp = session.try_receive(1024).unwrap();
        assert_eq!(
            CtrlMessage::deserialize(&resp).unwrap(),
            CtrlMessage::CreateIpcpResp {
                event_id: 5,
                ipcp_id: 0
            }
        );
        assert!(matches!(session.try_receive(1024), Err(RinaError::WouldBlock)));
    }

    #[test]
    fn test_length_bounds() {
        let session = session();
        assert!(matches!(
            session.submit(&[1, 0, 0, 0, 0]),
            Err(RinaError::BadMessage { .. })
        ));
        let oversized = vec![0u8; ControlConfig::MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            session.submit(&oversized),
            Err(RinaError::BadMessage { .. })
        ));
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn test_response_types_are_unsupported() {
        let session = session();
        let resp_type = MessageType::CreateIpcpResp.as_u16().to_le_bytes();
        let msg = [resp_type[0], resp_type[1], 1, 0, 0, 0, 0, 0];
        assert!(matches!(
            session.submit(&msg),
            Err(RinaError::Unsupported { msg_type: 2 })
        ));
        assert!(session.registry().is_empty().unwrap());
    }

    #[test]
    fn test_insufficient_buffer_keeps_response() {
        let session = session();
        session.submit(&create(1, "a")).unwrap();

        let err = session.try_receive(3).unwrap_err();
        let RinaError::InsufficientBuffer { needed, available } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(available, 3);
        assert_eq!(session.pending(), 1);
        assert_eq!(session.try_receive(needed).unwrap().len(), needed);
    }

    #[test]
    fn test_receive_blocks_until_submit() {
        let session = Arc::new(session());
        let cancel = CancellationToken::new();

        let reader = {
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            thread::spawn(move || session.receive(1024, &cancel))
        };
        thread::sleep(Duration::from_millis(50));
        session.submit(&create(7, "a")).unwrap();

        let resp = reader.join().unwrap().unwrap();
        assert_eq!(peek_header(&resp).unwrap(), (2, 7));
    }

    #[test]
    fn test_cancel_wakes_blocked_receive() {
        let session = Arc::new(session());
        let cancel = CancellationToken::new();

        let reader = {
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            thread::spawn(move || session.receive(1024, &cancel))
        };
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        assert!(matches!(
            reader.join().unwrap(),
            Err(RinaError::Cancelled)
        ));
    }

    #[test]
    fn test_queued_data_wins_over_cancellation() {
        let session = session();
        session.submit(&create(1, "a")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(session.receive(1024, &cancel).is_ok());
        assert!(matches!(
            session.receive(1024, &cancel),
            Err(RinaError::Cancelled)
        ));
    }

    #[test]
    fn test_sessions_do_not_share_queues() {
        let registry = Arc::new(Registry::with_default_factories().unwrap());
        let first = ControlSession::new(Arc::clone(&registry));
        let second = ControlSession::new(registry);

        first.submit(&create(1, "a")).unwrap();
        assert_eq!(first.pending(), 1);
        assert_eq!(second.pending(), 0);
    }
}
