use std::sync::Arc;

use bindrpc_core::ExceptionDescriptor;

use crate::{
    ConnectionContext, MethodRequest, MethodResult, NoSessions, RemoteDirectory, SessionResolver,
    completion::{self, Abandoned},
};

/// Routes decoded requests to bound services and collects their outcome.
#[derive(Clone)]
pub struct Dispatcher {
    directory: Arc<RemoteDirectory>,
    sessions: Arc<dyn SessionResolver>,
}

impl Dispatcher {
    pub fn new(directory: Arc<RemoteDirectory>) -> Self {
        Self {
            directory,
            sessions: Arc::new(NoSessions),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionResolver>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn directory(&self) -> &Arc<RemoteDirectory> {
        &self.directory
    }

    /// Executes one request. Every failure becomes the request's own
    /// exception result; nothing here waits on other requests.
    pub async fn dispatch(
        &self,
        mut request: Box<dyn MethodRequest>,
        context: &ConnectionContext,
    ) -> MethodResult {
        let interface_id = request.interface_id();
        let type_id = request.wire_type_id();
        let result_type = request.result_type_id();
        let remote = self.directory.resolve(interface_id);

        let needs_session = request.session_required()
            || remote.as_ref().is_some_and(|remote| remote.session_required());
        if needs_session || request.session_slot().is_some() {
            match self.sessions.resolve_session(context).await {
                Some(session) => {
                    if let Some(slot) = request.session_slot() {
                        slot.inject(session);
                    }
                }
                None if needs_session => {
                    tracing::debug!(
                        connection_id = context.connection_id.0,
                        interface_id = interface_id.0,
                        type_id = type_id.0,
                        "rejecting request without session"
                    );
                    return MethodResult::exception(
                        result_type,
                        ExceptionDescriptor::session_required(interface_id),
                    );
                }
                None => {}
            }
        }

        let Some(remote) = remote else {
            tracing::debug!(
                interface_id = interface_id.0,
                type_id = type_id.0,
                "no service bound for interface"
            );
            return MethodResult::exception(
                result_type,
                ExceptionDescriptor::unknown_interface(interface_id),
            );
        };

        tracing::debug!(
            connection_id = context.connection_id.0,
            interface_id = interface_id.0,
            type_id = type_id.0,
            "dispatching request"
        );
        let (completion, outcome) = completion::channel();
        request.execute(remote, completion).await;

        match outcome.await {
            Ok(outcome) => MethodResult::from_outcome(result_type, outcome),
            Err(Abandoned) => {
                tracing::warn!(
                    interface_id = interface_id.0,
                    type_id = type_id.0,
                    "method dropped its completion without an outcome"
                );
                MethodResult::exception(
                    result_type,
                    ExceptionDescriptor::internal("method finished without a result"),
                )
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
