use crate::status::{self, SubOperationOutcome};
use crate::transcode::{DatasetReader, Transcoder};
use crate::transport::{AcceptedContext, SubOperation, SubOperationTransport, TransportFault};
use crate::types::MatchedObject;

/// Choose the presentation context in which to send `object`.
///
/// A context for the SOP class of the object in its stored transfer syntax is preferred.
/// Otherwise, the first context for its SOP class is chosen, which will require transcoding.
pub fn select_context<'a>(
    accepted: &'a [AcceptedContext],
    object: &MatchedObject,
) -> Option<&'a AcceptedContext> {
    let mut candidates = accepted
        .iter()
        .filter(|pc| pc.abstract_syntax == object.sop_class_uid)
        .peekable();
    let first = *candidates.peek()?;
    candidates
        .find(|pc| object.is_stored_as(&pc.transfer_syntax))
        .or(Some(first))
}

/// Sends stored instances to the requester, one C-STORE sub-operation at a time.
pub struct SubOperationExecutor<S> {
    source: S,
}

impl<S: DatasetReader + Transcoder> SubOperationExecutor<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Send one instance in the presentation context `context` and wait for the requester
    /// to acknowledge it.
    ///
    /// Problems with the instance itself (it cannot be read or transcoded) are reported as a
    /// [SubOperationOutcome::Failure] and nothing is transmitted. Only a [TransportFault]
    /// is returned as an error.
    pub fn send<T: SubOperationTransport>(
        &self,
        transport: &mut T,
        object: &MatchedObject,
        context: &AcceptedContext,
    ) -> Result<SubOperationOutcome, TransportFault> {
        let encoded = if object.is_stored_as(&context.transfer_syntax) {
            self.source.read_dataset(object)
        } else {
            tracing::debug!(
                SOPInstanceUID = object.sop_instance_uid.as_str(),
                from = object.transfer_syntax.as_str(),
                to = context.transfer_syntax.as_str(),
                "transcoding"
            );
            self.source.transcode(object, &context.transfer_syntax)
        };
        let dataset = match encoded {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::error!(
                    SOPInstanceUID = object.sop_instance_uid.as_str(),
                    path = object.path.as_str(),
                    error = e.to_string(),
                );
                return Ok(SubOperationOutcome::Failure(status::PROCESSING_FAILURE));
            }
        };
        let sub_operation = SubOperation {
            presentation_context_id: context.id,
            sop_class_uid: object.sop_class_uid.clone(),
            sop_instance_uid: object.sop_instance_uid.clone(),
            dataset,
        };
        let status = transport.push_sub_operation(sub_operation)?;
        let outcome = SubOperationOutcome::from_store_status(status);
        tracing::info!(
            event = "sub_operation",
            SOPInstanceUID = object.sop_instance_uid.as_str(),
            status = format!("{status:04X}H"),
        );
        Ok(outcome)
    }
}
