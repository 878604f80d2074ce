//! TCP client for the control device, used by the control agent.
//!
//! # Thread Safety
//!
//! The client serializes calls through a tokio `Mutex` on the stream, so a
//! response always belongs to the request written just before it. Frames
//! with a foreign event id are skipped. An error frame for the pending
//! request becomes [`RinaError::Rejected`] carrying the device's errno.

use super::frame::{parse_error_frame, read_frame, write_frame};
use crate::config::{ControlConfig, DifType};
use crate::error::{Result, RinaError};
use crate::name::ProcessName;
use crate::registry::EntrySnapshot;
use crate::wire::{CtrlMessage, RESULT_OK};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection to a control device.
#[derive(Debug)]
pub struct ControlClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_event_id: AtomicU32,
}

impl ControlClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let lost = || RinaError::ConnectionLost {
            addr: addr.to_string(),
        };
        let stream = tokio::time::timeout(ControlConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| lost())?
            .map_err(|_| lost())?;

        debug!("Control client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_event_id: AtomicU32::new(1),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn next_event_id(&self) -> u32 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lost(&self) -> RinaError {
        RinaError::ConnectionLost {
            addr: self.addr.to_string(),
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, request: CtrlMessage) -> Result<CtrlMessage> {
        let expected = request.msg_type().response().ok_or_else(|| {
            RinaError::invalid_argument(format!("{} is not a request", request.msg_type()))
        })?;
        let event_id = request.event_id();
        let bytes = request.serialize()?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &bytes)
            .await
            .map_err(|_| self.lost())?;

        let exchange = async {
            loop {
                let frame = read_frame(&mut reader)
                    .await
                    .map_err(|_| self.lost())?
                    .ok_or_else(|| self.lost())?;
                if let Some((rejected, errno)) = parse_error_frame(&frame) {
                    if rejected == event_id {
                        return Err(RinaError::Rejected { event_id, errno });
                    }
                    continue;
                }
                let response = CtrlMessage::deserialize(&frame)?;
                if response.event_id() == event_id {
                    return Ok::<_, RinaError>(response);
                }
                debug!(
                    "Skipping response for event {} while waiting for {}",
                    response.event_id(),
                    event_id
                );
            }
        };
        let response = tokio::time::timeout(ControlConfig::REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| RinaError::Timeout { event_id })??;

        if response.msg_type() != expected {
            return Err(RinaError::bad_message(format!(
                "expected {}, got {}",
                expected,
                response.msg_type()
            )));
        }
        Ok(response)
    }

    pub async fn create_ipcp(&self, dif_type: DifType, name: ProcessName) -> Result<u16> {
        let request = CtrlMessage::CreateIpcp {
            event_id: self.next_event_id(),
            dif_type,
            name,
        };
        match self.call(request).await? {
            CtrlMessage::CreateIpcpResp { ipcp_id, .. } => Ok(ipcp_id),
            other => Err(unexpected(other)),
        }
    }

    /// Returns `false` if no instance has this id.
    pub async fn destroy_ipcp(&self, ipcp_id: u16) -> Result<bool> {
        let request = CtrlMessage::DestroyIpcp {
            event_id: self.next_event_id(),
            ipcp_id,
        };
        match self.call(request).await? {
            CtrlMessage::DestroyIpcpResp { result, .. } => Ok(result == RESULT_OK),
            other => Err(unexpected(other)),
        }
    }

    /// Returns `false` if no instance has this id.
    pub async fn assign_to_dif(&self, ipcp_id: u32, dif_name: ProcessName) -> Result<bool> {
        let request = CtrlMessage::AssignToDif {
            event_id: self.next_event_id(),
            ipcp_id,
            dif_name,
        };
        match self.call(request).await? {
            CtrlMessage::AssignToDifResp { result, .. } => Ok(result == RESULT_OK),
            other => Err(unexpected(other)),
        }
    }

    /// Walk the registry with repeated fetches until the end marker.
    pub async fn fetch_all(&self) -> Result<Vec<EntrySnapshot>> {
        let mut entries = Vec::new();
        loop {
            let request = CtrlMessage::FetchIpcp {
                event_id: self.next_event_id(),
            };
            match self.call(request).await? {
                CtrlMessage::FetchIpcpResp { end: true, .. } => return Ok(entries),
                CtrlMessage::FetchIpcpResp {
                    ipcp_id,
                    dif_type,
                    ipcp_name,
                    dif_name,
                    ..
                } => entries.push(EntrySnapshot {
                    id: ipcp_id,
                    dif_type,
                    name: ipcp_name,
                    dif_name: (!dif_name.is_empty()).then_some(dif_name),
                }),
                other => return Err(unexpected(other)),
            }
        }
    }
}

fn unexpected(msg: CtrlMessage) -> RinaError {
    RinaError::bad_message(format!("unexpected {} response", msg.msg_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ControlServer;
    use crate::registry::Registry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_client_lifecycle_calls() {
        let registry = Arc::new(Registry::with_default_factories().unwrap());
        let mut handle = ControlServer::start(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = ControlClient::connect(handle.addr()).await.unwrap();

        let id = client
            .create_ipcp(DifType::NORMAL, ProcessName::process("a.IPC"))
            .await
            .unwrap();
        assert_eq!(id, 0);
        assert!(client
            .assign_to_dif(0, ProcessName::process("test.DIF"))
            .await
            .unwrap());

        let entries = client.fetch_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dif_name, Some(ProcessName::process("test.DIF")));

        assert!(client.destroy_ipcp(0).await.unwrap());
        assert!(!client.destroy_ipcp(0).await.unwrap());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_call_rejects_response_types() {
        let registry = Arc::new(Registry::with_default_factories().unwrap());
        let mut handle = ControlServer::start(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = ControlClient::connect(handle.addr()).await.unwrap();

        let result = client
            .call(CtrlMessage::CreateIpcpResp {
                event_id: 1,
                ipcp_id: 0,
            })
            .await;
        assert!(matches!(result, Err(RinaError::InvalidArgument { .. })));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported_with_errno() {
        let registry = Registry::with_capacity(1);
        registry
            .register_factory(Arc::new(crate::normal::NormalFactory))
            .unwrap();
        let mut handle = ControlServer::start(Arc::new(registry), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = ControlClient::connect(handle.addr()).await.unwrap();

        client
            .create_ipcp(DifType::NORMAL, ProcessName::process("a.IPC"))
            .await
            .unwrap();
        let err = client
            .create_ipcp(DifType::NORMAL, ProcessName::process("b.IPC"))
            .await
            .unwrap_err();
        assert!(matches!(err, RinaError::Rejected { errno: -28, .. }));

        let err = client
            .create_ipcp(DifType(77), ProcessName::process("c.IPC"))
            .await
            .unwrap_err();
        assert_eq!(err.errno(), -22);

        // Same connection keeps working after the rejections.
        assert_eq!(client.fetch_all().await.unwrap().len(), 1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_dead_server() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        match ControlClient::connect(addr).await.unwrap_err() {
            RinaError::ConnectionLost { addr } => assert_eq!(addr, "127.0.0.1:1"),
            other => panic!("Expected ConnectionLost, got: {:?}", other),
        }
    }
}
