//! One C-GET request, from its identifier to its final response.

use crate::composite_status::{CompositeResult, SubOperationTally, compute_composite_result};
use crate::executor::{SubOperationExecutor, select_context};
use crate::identifier::RetrieveIdentifier;
use crate::resolver::{QueryResolver, ResolveError, StorageIndex};
use crate::status::{self, SubOperationOutcome};
use crate::transcode::{DatasetReader, Transcoder};
use crate::transport::{AcceptedContext, SubOperationTransport, TransportFault};
use crate::types::{MatchedObject, SopInstanceUid};

/// A C-GET request.
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub identifier: RetrieveIdentifier,
    /// Presentation contexts in which the requester accepts sub-operations.
    pub accepted: Vec<AcceptedContext>,
}

/// State of a retrieval.
///
/// ```text
/// Init ──> Resolved ──> Streaming ──> Completed
///   │          │            └───────> Cancelled
///   └──────────┴────────────────────> Unprocessable
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalState {
    Init,
    Resolved { total: usize },
    Streaming(SubOperationTally),
    Completed(SubOperationTally),
    Cancelled(SubOperationTally),
    Unprocessable,
}

/// Something which happened during a retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalEvent {
    /// The identifier is malformed, or could not be looked up.
    Rejected,
    /// The identifier matched this many instances.
    Matched(usize),
    /// The first sub-operation is about to be attempted.
    Begin,
    /// A sub-operation was attempted.
    Attempted(SopInstanceUid, SubOperationOutcome),
    /// A cancel indication was observed before the next sub-operation.
    CancelObserved,
    /// Every matched instance was attempted.
    Exhausted,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("{event:?} is not a valid event in state {state:?}")]
pub struct InvalidTransition {
    pub state: RetrievalState,
    pub event: RetrievalEvent,
}

impl RetrievalState {
    /// The state which follows `self` after `event`.
    pub fn next(self, event: RetrievalEvent) -> Result<Self, InvalidTransition> {
        use RetrievalEvent as E;
        use RetrievalState as S;
        match (self, event) {
            (S::Init, E::Rejected) => Ok(S::Unprocessable),
            (S::Init, E::Matched(0)) => Ok(S::Unprocessable),
            (S::Init, E::Matched(total)) => Ok(S::Resolved { total }),
            (S::Resolved { total }, E::Begin) => Ok(S::Streaming(SubOperationTally::new(total))),
            (S::Streaming(mut tally), E::Attempted(uid, outcome)) if tally.remaining() > 0 => {
                tally.record(&uid, outcome);
                Ok(S::Streaming(tally))
            }
            (S::Streaming(tally), E::CancelObserved) => Ok(S::Cancelled(tally)),
            (S::Streaming(tally), E::Exhausted) if tally.remaining() == 0 => {
                Ok(S::Completed(tally))
            }
            (state, event) => Err(InvalidTransition { state, event }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Cancelled(_) | Self::Unprocessable)
    }

    /// The final response, if this is a terminal state.
    pub fn composite_result(&self) -> Option<CompositeResult> {
        match self {
            Self::Completed(tally) => Some(compute_composite_result(Some(tally), false)),
            Self::Cancelled(tally) => Some(compute_composite_result(Some(tally), true)),
            Self::Unprocessable => Some(compute_composite_result(None, false)),
            _ => None,
        }
    }
}

/// Runs one C-GET request: resolves its identifier, then sends every matched instance
/// as a C-STORE sub-operation, stopping early only on a cancel indication.
pub struct RetrievalSession<'a, I, S> {
    resolver: &'a QueryResolver<I>,
    executor: &'a SubOperationExecutor<S>,
    pending_responses: bool,
    state: RetrievalState,
}

impl<'a, I, S> RetrievalSession<'a, I, S>
where
    I: StorageIndex,
    S: DatasetReader + Transcoder,
{
    pub fn new(resolver: &'a QueryResolver<I>, executor: &'a SubOperationExecutor<S>) -> Self {
        Self {
            resolver,
            executor,
            pending_responses: false,
            state: RetrievalState::Init,
        }
    }

    /// Whether to send a pending C-GET-RSP after each sub-operation but the last.
    pub fn with_pending_responses(mut self, pending_responses: bool) -> Self {
        self.pending_responses = pending_responses;
        self
    }

    /// Run the retrieval to its end.
    ///
    /// Returns the final response, or a [TransportFault] if the association was lost,
    /// in which case no response should be sent.
    pub fn run<T: SubOperationTransport>(
        mut self,
        request: &RetrieveRequest,
        transport: &mut T,
    ) -> Result<CompositeResult, TransportFault> {
        let matches = match self.resolve(&request.identifier) {
            Some(matches) => matches,
            None => {
                self.advance(RetrievalEvent::Rejected);
                return Ok(self.finish());
            }
        };
        self.advance(RetrievalEvent::Matched(matches.len()));
        if self.state.is_terminal() {
            tracing::info!(event = "c_get", "no instances match the identifier");
            return Ok(self.finish());
        }
        self.advance(RetrievalEvent::Begin);
        for (i, object) in matches.iter().enumerate() {
            if transport.poll_cancellation() {
                tracing::info!(
                    event = "c_get",
                    attempted = i,
                    total = matches.len(),
                    "cancel indication received"
                );
                self.advance(RetrievalEvent::CancelObserved);
                return Ok(self.finish());
            }
            let outcome = match select_context(&request.accepted, object) {
                Some(context) => self.executor.send(transport, object, context)?,
                None => {
                    tracing::warn!(
                        SOPInstanceUID = object.sop_instance_uid.as_str(),
                        SOPClassUID = object.sop_class_uid.as_str(),
                        "no presentation context was accepted for this SOP class"
                    );
                    SubOperationOutcome::Failure(status::SOP_CLASS_NOT_SUPPORTED)
                }
            };
            self.advance(RetrievalEvent::Attempted(
                object.sop_instance_uid.clone(),
                outcome,
            ));
            if let RetrievalState::Streaming(tally) = &self.state {
                if self.pending_responses && tally.remaining() > 0 {
                    transport.report_pending(tally)?;
                }
            }
        }
        self.advance(RetrievalEvent::Exhausted);
        Ok(self.finish())
    }

    fn resolve(&self, identifier: &RetrieveIdentifier) -> Option<Vec<MatchedObject>> {
        if let Err(e) = identifier.level() {
            tracing::warn!(event = "c_get", error = e.to_string());
            return None;
        }
        match self.resolver.resolve(identifier) {
            Ok(matches) => Some(matches),
            Err(ResolveError::Malformed(e)) => {
                tracing::warn!(event = "c_get", error = e.to_string());
                None
            }
            Err(ResolveError::Index(e)) => {
                tracing::error!(event = "c_get", error = e.to_string());
                None
            }
        }
    }

    fn advance(&mut self, event: RetrievalEvent) {
        let state = std::mem::replace(&mut self.state, RetrievalState::Init);
        self.state = state
            .next(event)
            .expect("retrieval loop produced an invalid state transition");
    }

    fn finish(self) -> CompositeResult {
        let result = self
            .state
            .composite_result()
            .expect("retrieval finished in a non-terminal state");
        tracing::info!(
            event = "c_get_result",
            status = format!("{:04X}H", result.status().code()),
            completed = result.completed(),
            failed = result.failed(),
            warning = result.warning(),
            remaining = result.remaining(),
        );
        result
    }
}
