//! A minimal C-GET SCU.
//!
//! Based on
//! https://github.com/Enet4/dicom-rs/blob/dbd41ed3a0d1536747c6b8ea2b286e4c6e8ccc8a/storescu/src/main.rs

use std::net::TcpStream;

use dicom::core::{DataElement, Tag, VR};
use dicom::dicom_value;
use dicom::dictionary_std::{tags, uids};
use dicom::object::{InMemDicomObject, StandardDataDictionary};
use dicom::transfer_syntax::entries;
use dicom::ul::pdu::{PDataValue, PDataValueType};
use dicom::ul::{ClientAssociation, ClientAssociationOptions, Pdu};

const GET_MODEL: &str = uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET;
const GET_MESSAGE_ID: u16 = 7;

/// What the SCU observed during a C-GET.
#[derive(Debug, Default)]
pub struct GetOutcome {
    /// SOP Instance UIDs of the received C-STORE-RQs, in order.
    pub stored: Vec<String>,
    /// Presentation context ID of each received C-STORE-RQ.
    pub contexts: Vec<u8>,
    /// Number of pending C-GET-RSPs.
    pub pending: usize,
    pub status: u16,
    pub completed: Option<u16>,
    pub failed: Option<u16>,
    pub warning: Option<u16>,
    pub remaining: Option<u16>,
    /// Failed SOP Instance UID List of the final response.
    pub failed_instances: Option<String>,
}

/// When the SCU sends a C-CANCEL-RQ, relative to its C-STORE-RSPs.
///
/// C-STORE-RQs are counted from 1.
#[derive(Debug, Clone, Copy)]
pub enum CancelAt {
    /// In its own P-DATA-TF, just before acknowledging the n-th C-STORE-RQ.
    BeforeAck(usize),
    /// In the same P-DATA-TF as the acknowledgment of the n-th C-STORE-RQ, after it.
    WithAck(usize),
}

/// How the SCU behaves during a C-GET.
#[derive(Debug, Clone)]
pub struct GetScript<'a> {
    pub study_instance_uid: &'a str,
    /// Storage SOP classes proposed after the C-GET information model.
    pub storage_classes: Vec<&'a str>,
    /// Status of every C-STORE-RSP.
    pub store_status: u16,
    pub cancel: Option<CancelAt>,
    /// Never acknowledge the n-th C-STORE-RQ, counting from 1.
    pub withhold_ack: Option<usize>,
}

impl<'a> GetScript<'a> {
    pub fn study(study_instance_uid: &'a str) -> Self {
        Self {
            study_instance_uid,
            storage_classes: vec![uids::MR_IMAGE_STORAGE],
            store_status: 0x0000,
            cancel: None,
            withhold_ack: None,
        }
    }
}

fn connect(addr: &str, abstract_syntaxes: &[&str]) -> ClientAssociation<TcpStream> {
    let mut options = ClientAssociationOptions::new()
        .calling_ae_title("GETSCU")
        .called_ae_title("OXIGETTEST")
        .max_pdu_length(16384);
    for abstract_syntax in abstract_syntaxes {
        options = options
            .with_presentation_context(*abstract_syntax, vec![uids::EXPLICIT_VR_LITTLE_ENDIAN]);
    }
    options.establish_with(addr).unwrap()
}

/// The ID dicom-rs gives to the presentation context proposed for `abstract_syntax`.
pub fn pc_id(proposed: &[&str], abstract_syntax: &str) -> u8 {
    let i = proposed
        .iter()
        .position(|uid| *uid == abstract_syntax)
        .unwrap();
    (2 * i + 1) as u8
}

fn command_data(cmd: &InMemDicomObject<StandardDataDictionary>) -> Vec<u8> {
    let mut data = Vec::with_capacity(128);
    cmd.write_dataset_with_ts(&mut data, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();
    data
}

fn pdv(presentation_context_id: u8, value_type: PDataValueType, data: Vec<u8>) -> PDataValue {
    PDataValue {
        presentation_context_id,
        value_type,
        is_last: true,
        data,
    }
}

fn read_u16(obj: &InMemDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().map(|e| e.to_int::<u16>().unwrap())
}

fn read_uid(obj: &InMemDicomObject, tag: Tag) -> String {
    obj.element(tag)
        .unwrap()
        .to_str()
        .unwrap()
        .trim_end_matches('\0')
        .to_string()
}

/// Send a C-ECHO-RQ and return the status of its response.
pub fn echo(addr: &str) -> u16 {
    let proposed = [uids::VERIFICATION];
    let mut scu = connect(addr, &proposed);
    let pc = pc_id(&proposed, uids::VERIFICATION);
    let cmd = InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, uids::VERIFICATION),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0030])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [1])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0101]),
        ),
    ]);
    scu.send(&Pdu::PData {
        data: vec![pdv(pc, PDataValueType::Command, command_data(&cmd))],
    })
    .unwrap();
    let status = match scu.receive().unwrap() {
        Pdu::PData { data } => {
            let rsp = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .unwrap();
            assert_eq!(read_u16(&rsp, tags::COMMAND_FIELD), Some(0x8030));
            read_u16(&rsp, tags::STATUS).unwrap()
        }
        pdu => panic!("Unexpected SCP response: {:?}", pdu),
    };
    scu.release().unwrap();
    status
}

/// Retrieve a study, acknowledging every C-STORE-RQ with `store_status`.
pub fn get_study(addr: &str, study_instance_uid: &str, store_status: u16) -> GetOutcome {
    get(
        addr,
        GetScript {
            store_status,
            ..GetScript::study(study_instance_uid)
        },
    )
}

/// Retrieve a study at the STUDY level, behaving as `script` says.
pub fn get(addr: &str, script: GetScript) -> GetOutcome {
    let mut proposed = vec![GET_MODEL];
    proposed.extend(script.storage_classes.iter().copied());
    let mut scu = connect(addr, &proposed);
    let get_pc = pc_id(&proposed, GET_MODEL);
    let cmd = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, GET_MODEL)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0010])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [GET_MESSAGE_ID])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0000]),
        ),
    ]);
    let identifier = InMemDicomObject::from_element_iter([
        DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, dicom_value!(Str, "STUDY")),
        DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, script.study_instance_uid),
        ),
    ]);
    let mut iod_data = Vec::with_capacity(128);
    identifier
        .write_dataset_with_ts(&mut iod_data, &entries::EXPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();
    scu.send(&Pdu::PData {
        data: vec![
            pdv(get_pc, PDataValueType::Command, command_data(&cmd)),
            pdv(get_pc, PDataValueType::Data, iod_data),
        ],
    })
    .unwrap();

    let mut outcome = GetOutcome::default();
    let mut command_buffer = Vec::new();
    let mut data_buffer = Vec::new();
    // (MessageID, AffectedSOPClassUID, AffectedSOPInstanceUID, presentation context ID)
    // of the current C-STORE-RQ
    let mut store_rq: Option<(u16, String, String, u8)> = None;
    let mut final_identifier_follows = false;
    'receive: loop {
        let data = match scu.receive().unwrap() {
            Pdu::PData { data } => data,
            pdu => panic!("Unexpected SCP message: {:?}", pdu),
        };
        for mut value in data {
            match value.value_type {
                PDataValueType::Command => {
                    command_buffer.append(&mut value.data);
                    if !value.is_last {
                        continue;
                    }
                    let cmd = InMemDicomObject::read_dataset_with_ts(
                        &command_buffer[..],
                        &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
                    )
                    .unwrap();
                    command_buffer.clear();
                    match read_u16(&cmd, tags::COMMAND_FIELD).unwrap() {
                        0x0001 => {
                            store_rq = Some((
                                read_u16(&cmd, tags::MESSAGE_ID).unwrap(),
                                read_uid(&cmd, tags::AFFECTED_SOP_CLASS_UID),
                                read_uid(&cmd, tags::AFFECTED_SOP_INSTANCE_UID),
                                value.presentation_context_id,
                            ));
                        }
                        0x8010 => {
                            let status = read_u16(&cmd, tags::STATUS).unwrap();
                            if status == 0xFF00 {
                                outcome.pending += 1;
                                continue;
                            }
                            outcome.status = status;
                            outcome.completed =
                                read_u16(&cmd, tags::NUMBER_OF_COMPLETED_SUBOPERATIONS);
                            outcome.failed = read_u16(&cmd, tags::NUMBER_OF_FAILED_SUBOPERATIONS);
                            outcome.warning =
                                read_u16(&cmd, tags::NUMBER_OF_WARNING_SUBOPERATIONS);
                            outcome.remaining =
                                read_u16(&cmd, tags::NUMBER_OF_REMAINING_SUBOPERATIONS);
                            final_identifier_follows =
                                read_u16(&cmd, tags::COMMAND_DATA_SET_TYPE) != Some(0x0101);
                            if !final_identifier_follows {
                                break 'receive;
                            }
                        }
                        other => panic!("Unexpected command {other:#06x}"),
                    }
                }
                PDataValueType::Data => {
                    data_buffer.append(&mut value.data);
                    if !value.is_last {
                        continue;
                    }
                    if let Some((message_id, sop_class_uid, uid, pc)) = store_rq.take() {
                        outcome.stored.push(uid.clone());
                        outcome.contexts.push(pc);
                        let n = outcome.stored.len();
                        if script.withhold_ack != Some(n) {
                            let rsp = store_rsp_command(
                                &sop_class_uid,
                                &uid,
                                message_id,
                                script.store_status,
                            );
                            let ack = pdv(pc, PDataValueType::Command, command_data(&rsp));
                            let cancel = pdv(
                                get_pc,
                                PDataValueType::Command,
                                command_data(&cancel_rq_command(GET_MESSAGE_ID)),
                            );
                            let data = match script.cancel {
                                Some(CancelAt::BeforeAck(k)) if k == n => {
                                    scu.send(&Pdu::PData { data: vec![cancel] }).unwrap();
                                    vec![ack]
                                }
                                Some(CancelAt::WithAck(k)) if k == n => vec![ack, cancel],
                                _ => vec![ack],
                            };
                            scu.send(&Pdu::PData { data }).unwrap();
                        }
                    } else if final_identifier_follows {
                        let identifier = InMemDicomObject::read_dataset_with_ts(
                            &data_buffer[..],
                            &entries::EXPLICIT_VR_LITTLE_ENDIAN.erased(),
                        )
                        .unwrap();
                        outcome.failed_instances = identifier
                            .element(tags::FAILED_SOP_INSTANCE_UID_LIST)
                            .ok()
                            .map(|e| e.to_str().unwrap().trim_end_matches('\0').to_string());
                        break 'receive;
                    }
                    data_buffer.clear();
                }
            }
        }
    }
    scu.release().unwrap();
    outcome
}

fn store_rsp_command(
    sop_class_uid: &str,
    sop_instance_uid: &str,
    message_id: u16,
    status: u16,
) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8001])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id])
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0101]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

fn cancel_rq_command(get_message_id: u16) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0FFF])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [get_message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0101]),
        ),
    ])
}
