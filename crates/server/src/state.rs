//! Shared state handed to every HTTP handler.

use wecomrelay_protocol::CallbackCodec;

use crate::dispatch::Pipeline;
use crate::wecom::WeComClient;

pub struct AppState<S = WeComClient> {
    pub codec: CallbackCodec,
    pub pipeline: Pipeline<S>,
}

impl<S> AppState<S> {
    pub fn new(codec: CallbackCodec, pipeline: Pipeline<S>) -> Self {
        Self { codec, pipeline }
    }
}
