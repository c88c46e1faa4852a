//! The parts of the A-ASSOCIATE-RQ which a negotiated [ServerAssociation] does not keep.
//!
//! [ServerAssociation]: dicom::ul::ServerAssociation

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use dicom::ul::pdu::{
    AssociationRQ, UserVariableItem, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE,
};
use dicom::ul::{read_pdu, Pdu};

use crate::types::SopClassUid;

/// How long to wait for the rest of an A-ASSOCIATE-RQ once its first bytes arrived.
const PEEK_DEADLINE: Duration = Duration::from_secs(30);
const PEEK_INTERVAL: Duration = Duration::from_millis(2);

/// What the requester proposed when it opened the association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AssociationRequest {
    /// Abstract syntax of each proposed presentation context, by presentation context ID.
    abstract_syntaxes: HashMap<u8, SopClassUid>,
    /// Largest PDU the requester can receive.
    max_pdu_length: u32,
}

impl Default for AssociationRequest {
    fn default() -> Self {
        Self {
            abstract_syntaxes: HashMap::new(),
            max_pdu_length: DEFAULT_MAX_PDU,
        }
    }
}

impl AssociationRequest {
    /// Read the A-ASSOCIATE-RQ waiting on `stream` without consuming it, so that it can
    /// still be negotiated by [dicom::ul::ServerAssociationOptions::establish].
    ///
    /// Returns `None` if the first PDU is not an A-ASSOCIATE-RQ.
    pub fn peek(stream: &TcpStream) -> std::io::Result<Option<Self>> {
        let mut buf = vec![0u8; (MAXIMUM_PDU_SIZE + PDU_HEADER_SIZE) as usize];
        let started = Instant::now();
        loop {
            let n = stream.peek(&mut buf)?;
            if n == 0 {
                return Err(ErrorKind::UnexpectedEof.into());
            }
            match read_pdu(&buf[..n], MAXIMUM_PDU_SIZE, false) {
                Ok(Some(pdu)) => return Ok(Self::from_pdu(&pdu)),
                Ok(None) if n < buf.len() && started.elapsed() < PEEK_DEADLINE => {
                    std::thread::sleep(PEEK_INTERVAL)
                }
                Ok(None) => return Err(ErrorKind::TimedOut.into()),
                // left for the association negotiation to reject
                Err(_) => return Ok(None),
            }
        }
    }

    pub fn from_pdu(pdu: &Pdu) -> Option<Self> {
        let Pdu::AssociationRQ(AssociationRQ {
            presentation_contexts,
            user_variables,
            ..
        }) = pdu
        else {
            return None;
        };
        let abstract_syntaxes = presentation_contexts
            .iter()
            .map(|pc| {
                let uid = pc.abstract_syntax.trim_end_matches(['\0', ' ']);
                (pc.id, SopClassUid::from(uid))
            })
            .collect();
        let max_pdu_length = user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);
        // zero means no limit, which the standard caps
        let max_pdu_length = if max_pdu_length == 0 {
            MAXIMUM_PDU_SIZE
        } else {
            max_pdu_length
        };
        Some(Self {
            abstract_syntaxes,
            max_pdu_length,
        })
    }

    /// The abstract syntax which was proposed for a presentation context.
    pub fn abstract_syntax(&self, presentation_context_id: u8) -> Option<&SopClassUid> {
        self.abstract_syntaxes.get(&presentation_context_id)
    }

    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }
}
