//! DIMSE command sets sent and received by the C-GET SCP.
//!
//! Commands are always encoded in Implicit VR Little Endian.

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, StandardDataDictionary};
use dicom::transfer_syntax::entries;

use crate::composite_status::{CompositeResult, SubOperationTally};
use crate::status;

pub const C_STORE_RQ: u16 = 0x0001;
pub const C_STORE_RSP: u16 = 0x8001;
pub const C_GET_RQ: u16 = 0x0010;
pub const C_GET_RSP: u16 = 0x8010;
pub const C_ECHO_RQ: u16 = 0x0030;
pub const C_ECHO_RSP: u16 = 0x8030;
pub const C_CANCEL_RQ: u16 = 0x0FFF;

/// CommandDataSetType value meaning no data set follows the command.
const NO_DATA_SET: u16 = 0x0101;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Failed to read DIMSE command")]
    Read(#[from] dicom::object::ReadError),

    #[error("Failed to write DIMSE command")]
    Write(#[from] dicom::object::WriteError),

    #[error("Command is missing CommandField")]
    MissingCommandField,
}

/// The parts of a received command set which the SCP cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub command_field: u16,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub status: Option<u16>,
    pub affected_sop_class_uid: Option<String>,
    /// Whether a data set follows this command.
    pub has_dataset: bool,
}

impl ReceivedCommand {
    pub fn read(data: &[u8]) -> Result<Self, CommandError> {
        let obj = InMemDicomObject::read_dataset_with_ts(
            data,
            &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
        )?;
        let command_field =
            read_u16(&obj, tags::COMMAND_FIELD).ok_or(CommandError::MissingCommandField)?;
        let has_dataset = read_u16(&obj, tags::COMMAND_DATA_SET_TYPE)
            .is_some_and(|data_set_type| data_set_type != NO_DATA_SET);
        let affected_sop_class_uid = obj
            .element(tags::AFFECTED_SOP_CLASS_UID)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string());
        Ok(Self {
            command_field,
            message_id: read_u16(&obj, tags::MESSAGE_ID),
            message_id_being_responded_to: read_u16(&obj, tags::MESSAGE_ID_BEING_RESPONDED_TO),
            status: read_u16(&obj, tags::STATUS),
            affected_sop_class_uid,
            has_dataset,
        })
    }
}

fn read_u16(obj: &InMemDicomObject, tag: dicom::core::Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

/// Encode a command set.
pub fn encode_command(
    cmd: &InMemDicomObject<StandardDataDictionary>,
) -> Result<Vec<u8>, CommandError> {
    let mut data = Vec::with_capacity(128);
    cmd.write_dataset_with_ts(&mut data, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())?;
    Ok(data)
}

/// C-STORE-RQ of a sub-operation.
pub fn store_rq_command(
    sop_class_uid: &str,
    sop_instance_uid: &str,
    message_id: u16,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_STORE_RQ])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        // medium
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0000]),
        ),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

/// Pending C-GET-RSP, reporting progress after a sub-operation.
pub fn pending_get_rsp_command(
    sop_class_uid: &str,
    message_id: u16,
    tally: &SubOperationTally,
) -> InMemDicomObject<StandardDataDictionary> {
    let mut elements = get_rsp_header(sop_class_uid, message_id, status::PENDING, false);
    elements.push(counter(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, tally.remaining()));
    elements.push(counter(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, tally.completed));
    elements.push(counter(tags::NUMBER_OF_FAILED_SUBOPERATIONS, tally.failed));
    elements.push(counter(tags::NUMBER_OF_WARNING_SUBOPERATIONS, tally.warning));
    InMemDicomObject::command_from_element_iter(elements)
}

/// Final C-GET-RSP, and the identifier which follows it if any sub-operation failed.
///
/// The identifier lists the SOP Instance UIDs of the failed sub-operations.
pub fn final_get_rsp(
    sop_class_uid: &str,
    message_id: u16,
    result: &CompositeResult,
) -> (
    InMemDicomObject<StandardDataDictionary>,
    Option<InMemDicomObject<StandardDataDictionary>>,
) {
    let identifier = if result.failed_instances().is_empty() {
        None
    } else {
        let uids = result
            .failed_instances()
            .iter()
            .map(|uid| uid.as_str().to_string())
            .collect();
        Some(InMemDicomObject::from_element_iter([DataElement::new(
            tags::FAILED_SOP_INSTANCE_UID_LIST,
            VR::UI,
            PrimitiveValue::Strs(uids),
        )]))
    };
    let mut elements = get_rsp_header(
        sop_class_uid,
        message_id,
        result.status().code(),
        identifier.is_some(),
    );
    if let Some(remaining) = result.remaining() {
        elements.push(counter(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, remaining));
    }
    if let Some(counts) = result.counts() {
        elements.push(counter(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, counts.completed));
        elements.push(counter(tags::NUMBER_OF_FAILED_SUBOPERATIONS, counts.failed));
        elements.push(counter(tags::NUMBER_OF_WARNING_SUBOPERATIONS, counts.warning));
    }
    (InMemDicomObject::command_from_element_iter(elements), identifier)
}

fn get_rsp_header(
    sop_class_uid: &str,
    message_id: u16,
    status: u16,
    has_dataset: bool,
) -> Vec<InMemElement> {
    let data_set_type = if has_dataset { 0x0000 } else { NO_DATA_SET };
    vec![
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_GET_RSP])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [data_set_type]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
    ]
}

/// A sub-operation counter. Counts beyond the range of US are clamped.
fn counter(tag: dicom::core::Tag, n: usize) -> InMemElement {
    let n = u16::try_from(n).unwrap_or_else(|_| {
        tracing::warn!(
            ?tag,
            count = n,
            "sub-operation count does not fit in a response, sending {}",
            u16::MAX
        );
        u16::MAX
    });
    DataElement::new(tag, VR::US, dicom_value!(U16, [n]))
}

pub fn echo_rsp_command(message_id: u16) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_ECHO_RSP])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [NO_DATA_SET]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status::SUCCESS])),
    ])
}
