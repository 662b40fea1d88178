use remoting_common::{ApiReply, Encoder, Message, RemotingError, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::connection::Connection;

/// One request/response round trip on a given connection.
///
/// Shared by the client and the login handshake. Nothing is retried here, and
/// the request only goes out on the given physical session.
#[derive(Clone)]
pub(crate) struct Exchange {
    encoder: Arc<dyn Encoder>,
}

impl Exchange {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    /// Sends `request` and decodes the reply, mapping non-zero codes to
    /// [`RemotingError::Api`].
    pub async fn send(&self, conn: &Connection, session: u64, request: Message) -> Result<(Message, ApiReply)> {
        let action = request.action.clone();
        let response = conn
            .send(session, request)
            .await?
            .ok_or_else(|| RemotingError::Decode(format!("No reply received for '{action}'")))?;

        let reply = self.encoder.decode(&response)?;
        if !reply.is_success() {
            return Err(RemotingError::Api {
                code: reply.code,
                message: reply.payload_text(),
            });
        }
        Ok((response, reply))
    }

    /// Encodes `args`, sends them as `action` and decodes the result value.
    pub async fn call(&self, conn: &Connection, session: u64, action: &str, args: &Value) -> Result<Value> {
        let request = self.encoder.create_request(action, args)?;
        let (_, reply) = self.send(conn, session, request).await?;
        self.encoder.decode_result(action, &reply.payload)
    }
}
