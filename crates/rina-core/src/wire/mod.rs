//! Binary wire formats.
//!
//! Control messages exchanged with the control agent and the PCI header
//! carried by every PDU. All multi-byte integers are little-endian.
//!
//! ```text
//! control message: [u16 type][u32 event id][body...]
//! name:            4 x ([u16 len][len bytes UTF-8]), len 0 = absent
//! PCI:             [u64 dst][u64 src][u8 qos][u32 dst cep][u32 src cep]
//!                  [u8 type][u8 flags][u64 seqnum]
//! ```

mod codec;
pub mod message;
pub mod pci;

pub use message::{peek_header, CtrlMessage, MessageType, RESULT_NOT_FOUND, RESULT_OK};
pub use pci::{ConnectionId, Pci, PduBuf, PduType, PCI_LEN};
