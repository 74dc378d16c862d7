//! Call handles pairing one direction's writer with the other's reader.

use std::sync::Arc;

use crate::channel::FrameChannel;
use crate::checksum::Checksum;
use crate::exchange::MessageExchange;
use crate::fragment::ReadableFragment;
use crate::message::{CallReq, CallRes, RequestMessages, ResponseMessages};
use crate::reqres::{ReqResReader, ReqResWriter};

/// A call this side initiated: write the request, then read the response.
pub struct OutboundCall {
    request: ReqResWriter<RequestMessages>,
    response: ReqResReader<ResponseMessages>,
}

impl OutboundCall {
    pub(crate) fn new(
        channel: FrameChannel,
        mex: Arc<MessageExchange>,
        call_req: CallReq,
        checksum: Box<dyn Checksum>,
    ) -> Self {
        Self {
            request: ReqResWriter::new(
                channel,
                Arc::clone(&mex),
                RequestMessages::new(call_req),
                checksum,
            ),
            response: ReqResReader::new(mex, ResponseMessages::default()).shutdown_when_done(),
        }
    }

    pub fn id(&self) -> u32 {
        self.request.exchange().id()
    }

    pub fn exchange(&self) -> &Arc<MessageExchange> {
        self.request.exchange()
    }

    pub fn request(&mut self) -> &mut ReqResWriter<RequestMessages> {
        &mut self.request
    }

    pub fn response(&mut self) -> &mut ReqResReader<ResponseMessages> {
        &mut self.response
    }

    /// Response envelope; populated once the first response fragment is read.
    pub fn call_res(&self) -> &CallRes {
        &self.response.messages().call_res
    }

    /// Abandon the call. Pending and later operations fail with `Cancelled`.
    pub fn cancel(&self) {
        self.exchange().cancellation().cancel();
    }
}

/// A call the peer initiated: read the request, then write the response.
pub struct InboundCall {
    request: ReqResReader<RequestMessages>,
    response: ReqResWriter<ResponseMessages>,
}

impl InboundCall {
    pub(crate) fn new(
        channel: FrameChannel,
        mex: Arc<MessageExchange>,
        messages: RequestMessages,
        initial_fragment: ReadableFragment,
        checksum: Box<dyn Checksum>,
    ) -> Self {
        Self {
            request: ReqResReader::with_initial_fragment(
                Arc::clone(&mex),
                messages,
                initial_fragment,
            ),
            response: ReqResWriter::new(channel, mex, ResponseMessages::default(), checksum)
                .shutdown_when_done(),
        }
    }

    pub fn id(&self) -> u32 {
        self.request.exchange().id()
    }

    pub fn exchange(&self) -> &Arc<MessageExchange> {
        self.request.exchange()
    }

    pub fn call_req(&self) -> &CallReq {
        &self.request.messages().call_req
    }

    pub fn service(&self) -> &str {
        &self.call_req().service
    }

    pub fn request(&mut self) -> &mut ReqResReader<RequestMessages> {
        &mut self.request
    }

    pub fn response(&mut self) -> &mut ReqResWriter<ResponseMessages> {
        &mut self.response
    }
}
