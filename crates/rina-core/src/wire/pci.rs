//! PDU protocol control information and the buffer that carries it.

use super::codec::Reader;
use crate::config::NormalConfig;
use crate::error::{Result, RinaError};
use bytes::{BufMut, Bytes, BytesMut};

/// Serialized PCI size: dst(8) + src(8) + qos(1) + dst cep(4) + src cep(4)
/// + type(1) + flags(1) + seqnum(8).
pub const PCI_LEN: usize = 35;

/// PDU type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Data,
    Management,
    Other(u8),
}

impl PduType {
    const DATA: u8 = 0x80;
    const MANAGEMENT: u8 = 0x40;

    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::DATA => PduType::Data,
            Self::MANAGEMENT => PduType::Management,
            other => PduType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PduType::Data => Self::DATA,
            PduType::Management => Self::MANAGEMENT,
            PduType::Other(value) => value,
        }
    }
}

/// Connection identifier: QoS class plus the connection-endpoint ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionId {
    pub qos_id: u8,
    pub dst_cep: u32,
    pub src_cep: u32,
}

/// Protocol control information prepended by each layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pci {
    pub dst_addr: u64,
    pub src_addr: u64,
    pub conn_id: ConnectionId,
    pub pdu_type: PduType,
    pub pdu_flags: u8,
    pub seqnum: u64,
}

impl Pci {
    /// Management PCI; connection id, flags and sequence number do not apply.
    pub fn management(dst_addr: u64, src_addr: u64) -> Self {
        Self {
            dst_addr,
            src_addr,
            conn_id: ConnectionId::default(),
            pdu_type: PduType::Management,
            pdu_flags: 0,
            seqnum: 0,
        }
    }

    fn encode(&self, out: &mut impl BufMut) {
        out.put_u64_le(self.dst_addr);
        out.put_u64_le(self.src_addr);
        out.put_u8(self.conn_id.qos_id);
        out.put_u32_le(self.conn_id.dst_cep);
        out.put_u32_le(self.conn_id.src_cep);
        out.put_u8(self.pdu_type.as_u8());
        out.put_u8(self.pdu_flags);
        out.put_u64_le(self.seqnum);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PCI_LEN {
            return Err(RinaError::malformed_pdu(format!(
                "{} bytes cannot hold a {}-byte PCI",
                buf.len(),
                PCI_LEN
            )));
        }
        let mut reader = Reader::new(&buf[..PCI_LEN]);
        Ok(Self {
            dst_addr: reader.u64("dst addr")?,
            src_addr: reader.u64("src addr")?,
            conn_id: ConnectionId {
                qos_id: reader.u8("qos id")?,
                dst_cep: reader.u32("dst cep")?,
                src_cep: reader.u32("src cep")?,
            },
            pdu_type: PduType::from_u8(reader.u8("pdu type")?),
            pdu_flags: reader.u8("pdu flags")?,
            seqnum: reader.u64("seqnum")?,
        })
    }
}

/// An SDU travelling through the stack, plus the PCI headers pushed on it.
///
/// Each layer pushes one header on the way down and pops one on the way up.
/// The buffer counts the headers it carries and refuses to grow past
/// [`NormalConfig::MAX_LAYER_DEPTH`]. Room for that many headers is reserved
/// in front of the SDU up front, so pushing writes in place.
#[derive(Debug, Clone)]
pub struct PduBuf {
    /// Headroom followed by the live bytes starting at `head`.
    data: BytesMut,
    head: usize,
    depth: usize,
}

/// Headroom reserved in front of every new SDU.
const HEADROOM: usize = NormalConfig::MAX_LAYER_DEPTH * PCI_LEN;

impl PduBuf {
    /// Wrap an SDU that carries no header yet.
    pub fn from_sdu(sdu: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(HEADROOM + sdu.len());
        data.resize(HEADROOM, 0);
        data.extend_from_slice(sdu);
        Self {
            data,
            head: HEADROOM,
            depth: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of headers currently pushed.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Prepend a header, growing the buffer by [`PCI_LEN`].
    pub fn push_pci(&mut self, pci: &Pci) -> Result<()> {
        // head >= (MAX_LAYER_DEPTH - depth) * PCI_LEN
        if self.depth >= NormalConfig::MAX_LAYER_DEPTH {
            return Err(RinaError::LayerDepthExceeded {
                depth: self.depth + 1,
                max: NormalConfig::MAX_LAYER_DEPTH,
            });
        }
        self.head -= PCI_LEN;
        let mut slot = &mut self.data[self.head..self.head + PCI_LEN];
        pci.encode(&mut slot);
        self.depth += 1;
        Ok(())
    }

    /// Decode the leading header without removing it.
    pub fn peek_pci(&self) -> Result<Pci> {
        Pci::decode(self.as_slice())
    }

    /// Strip the leading header, shrinking the buffer by [`PCI_LEN`].
    pub fn pop_pci(&mut self) -> Result<Pci> {
        let pci = self.peek_pci()?;
        self.head += PCI_LEN;
        self.depth = self.depth.saturating_sub(1);
        Ok(pci)
    }

    pub fn freeze(self) -> Bytes {
        self.data.freeze().slice(self.head..)
    }
}

impl Default for PduBuf {
    fn default() -> Self {
        Self::from_sdu(&[])
    }
}

impl PartialEq for PduBuf {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth && self.as_slice() == other.as_slice()
    }
}

impl Eq for PduBuf {}
