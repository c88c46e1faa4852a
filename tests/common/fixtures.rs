#![allow(non_snake_case)]

use std::sync::Once;

use camino::{Utf8Path, Utf8PathBuf};
use dicom::core::{DataElement, VR};
use dicom::dicom_value;
use dicom::dictionary_std::{tags, uids};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use oxiget::{
    AcceptedContext, MatchedObject, RetrieveIdentifier, RetrieveLevel, RetrieveRequest,
    SopClassUid, SopInstanceUid, TransferSyntaxUid, MatchingKey,
};

static INIT_LOGGING: Once = Once::new();

pub const STUDY: &str = "1.2.826.0.1.3680043.8.498.1";
pub const SERIES: &str = "1.2.826.0.1.3680043.8.498.1.1";

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .finish(),
        )
        .unwrap()
    })
}

/// An MR image of [STUDY] stored in explicit VR little endian.
pub fn mr(sop_instance_uid: &str) -> MatchedObject {
    MatchedObject {
        path: Utf8PathBuf::from(format!("/data/{sop_instance_uid}.dcm")),
        sop_class_uid: SopClassUid::from_static(uids::MR_IMAGE_STORAGE),
        sop_instance_uid: SopInstanceUid::from(sop_instance_uid),
        transfer_syntax: TransferSyntaxUid::from_static(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        PatientID: "123ABC".to_string(),
        StudyInstanceUID: STUDY.to_string(),
        SeriesInstanceUID: SERIES.to_string(),
    }
}

/// `n` MR images of [SERIES], numbered from 1.
pub fn mr_series(n: usize) -> Vec<MatchedObject> {
    (1..=n).map(|i| mr(&format!("{SERIES}.{i}"))).collect()
}

pub fn context(id: u8, abstract_syntax: &str, transfer_syntax: &str) -> AcceptedContext {
    AcceptedContext {
        id,
        abstract_syntax: SopClassUid::from(abstract_syntax),
        transfer_syntax: TransferSyntaxUid::from(transfer_syntax),
    }
}

/// C-GET of [STUDY], where the requester accepts MR images in explicit VR little endian.
pub fn study_request() -> RetrieveRequest {
    RetrieveRequest {
        identifier: RetrieveIdentifier::new(
            RetrieveLevel::Study,
            [MatchingKey::new(tags::STUDY_INSTANCE_UID, STUDY)],
        ),
        accepted: vec![context(3, uids::MR_IMAGE_STORAGE, uids::EXPLICIT_VR_LITTLE_ENDIAN)],
    }
}

/// Write an MR image to `dir`, returning its path.
pub fn write_mr_instance(
    dir: &Utf8Path,
    study_instance_uid: &str,
    series_instance_uid: &str,
    sop_instance_uid: &str,
    instance_number: &str,
) -> Utf8PathBuf {
    write_instance(
        dir,
        uids::MR_IMAGE_STORAGE,
        study_instance_uid,
        series_instance_uid,
        sop_instance_uid,
        instance_number,
    )
}

/// Write an instance of `sop_class_uid` in explicit VR little endian to `dir`,
/// returning its path.
pub fn write_instance(
    dir: &Utf8Path,
    sop_class_uid: &str,
    study_instance_uid: &str,
    series_instance_uid: &str,
    sop_instance_uid: &str,
    instance_number: &str,
) -> Utf8PathBuf {
    let path = dir.join(format!("{sop_instance_uid}.dcm"));
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(sop_class_uid)
        .media_storage_sop_instance_uid(sop_instance_uid);
    InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, dicom_value!(Str, sop_class_uid)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, sop_instance_uid)),
        DataElement::new(tags::PATIENT_ID, VR::LO, dicom_value!(Str, "123ABC")),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, dicom_value!(Str, study_instance_uid)),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, dicom_value!(Str, series_instance_uid)),
        DataElement::new(tags::INSTANCE_NUMBER, VR::IS, dicom_value!(Str, instance_number)),
    ])
    .with_meta(meta)
    .unwrap()
    .write_to_file(&path)
    .unwrap();
    path
}
