//! Outbound HL7 v2 transport.

use crate::{MtbError, MtbResult};
use hl7v2::{Message, MllpClient};

pub trait Hl7Sender: Send + Sync {
    /// Send one message and wait for the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::Transport`] if the message could not be delivered.
    fn send(&self, message: &Message) -> MtbResult<()>;
}

impl Hl7Sender for MllpClient {
    fn send(&self, message: &Message) -> MtbResult<()> {
        let ack = MllpClient::send(self, message).map_err(|e| {
            MtbError::Transport(format!("sending to {} failed: {e}", self.address()))
        })?;

        if ack.is_accepted() {
            tracing::info!(
                address = %self.address(),
                control_id = ?message.control_id(),
                "HL7 v2 message acknowledged"
            );
        } else {
            tracing::warn!(
                address = %self.address(),
                code = %ack.code,
                text = ?ack.text,
                "HL7 v2 message not accepted"
            );
        }
        Ok(())
    }
}
