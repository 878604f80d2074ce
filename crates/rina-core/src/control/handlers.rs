//! Request handlers, indexed by message type.

use crate::error::{Result, RinaError};
use crate::registry::Registry;
use crate::wire::{CtrlMessage, MessageType, RESULT_NOT_FOUND, RESULT_OK};
use tracing::debug;

/// Performs one request against the registry and builds its response.
pub(crate) type Handler = fn(&Registry, CtrlMessage) -> Result<CtrlMessage>;

/// Dispatch table. Response-only and unknown types have no entry.
pub(crate) static HANDLERS: [Option<Handler>; MessageType::MAX as usize] = [
    None,
    Some(create_ipcp),
    None,
    Some(destroy_ipcp),
    None,
    Some(fetch_ipcp),
    None,
    Some(assign_to_dif),
    None,
];

pub(crate) fn lookup(msg_type: u16) -> Option<Handler> {
    HANDLERS.get(msg_type as usize).copied().flatten()
}

fn unexpected(msg: &CtrlMessage) -> RinaError {
    RinaError::bad_message(format!("{} routed to the wrong handler", msg.msg_type()))
}

fn result_code(found: bool) -> u8 {
    if found {
        RESULT_OK
    } else {
        RESULT_NOT_FOUND
    }
}

fn create_ipcp(registry: &Registry, msg: CtrlMessage) -> Result<CtrlMessage> {
    let (event_id, dif_type, name) = match msg {
        CtrlMessage::CreateIpcp {
            event_id,
            dif_type,
            name,
        } => (event_id, dif_type, name),
        other => return Err(unexpected(&other)),
    };

    let ipcp_id = registry.create_instance(dif_type, name)?;
    Ok(CtrlMessage::CreateIpcpResp { event_id, ipcp_id })
}

fn destroy_ipcp(registry: &Registry, msg: CtrlMessage) -> Result<CtrlMessage> {
    let CtrlMessage::DestroyIpcp { event_id, ipcp_id } = msg else {
        return Err(unexpected(&msg));
    };

    let found = registry.destroy_instance(ipcp_id)?;
    Ok(CtrlMessage::DestroyIpcpResp {
        event_id,
        result: result_code(found),
    })
}

fn fetch_ipcp(registry: &Registry, msg: CtrlMessage) -> Result<CtrlMessage> {
    let CtrlMessage::FetchIpcp { event_id } = msg else {
        return Err(unexpected(&msg));
    };

    let Some(entry) = registry.enumerate_next()? else {
        debug!("Fetch reached end of registry");
        return Ok(CtrlMessage::fetch_end(event_id));
    };
    Ok(CtrlMessage::FetchIpcpResp {
        event_id,
        end: false,
        ipcp_id: entry.id,
        dif_type: entry.dif_type,
        ipcp_name: entry.name,
        dif_name: entry.dif_name.unwrap_or_default(),
    })
}

fn assign_to_dif(registry: &Registry, msg: CtrlMessage) -> Result<CtrlMessage> {
    let (event_id, ipcp_id, dif_name) = match msg {
        CtrlMessage::AssignToDif {
            event_id,
            ipcp_id,
            dif_name,
        } => (event_id, ipcp_id, dif_name),
        other => return Err(unexpected(&other)),
    };

    // Ids travel as u32 here; anything beyond the id space is simply unknown.
    let found = match u16::try_from(ipcp_id) {
        Ok(id) => registry.assign_to_dif(id, dif_name)?,
        Err(_) => false,
    };
    Ok(CtrlMessage::AssignToDifResp {
        event_id,
        result: result_code(found),
    })
}
