//! Identify-by-id handshake for live streams.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::live::{ClientSink, LiveRegistry};
use crate::error::{Result, VigilError};

/// First frame a client sends after connecting.
#[derive(Debug, Deserialize)]
pub struct Identify {
    #[serde(alias = "Id", alias = "ID")]
    pub id: u64,
}

/// Reply sent before ending a session that could not be bound.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindFailure {
    pub success: bool,
    pub code: u16,
    pub message: String,
}

impl BindFailure {
    fn new(message: String) -> Self {
        Self {
            success: false,
            code: 400,
            message,
        }
    }
}

/// Attach `client` to the live entry named by `identify`.
///
/// On failure the client receives a [`BindFailure`] frame and is closed;
/// the error is returned so the transport can stop reading.
pub fn bind_client<S: Send>(
    registry: &LiveRegistry<S>,
    identify: &str,
    client: Arc<dyn ClientSink>,
) -> Result<u64> {
    let id = match serde_json::from_str::<Identify>(identify) {
        Ok(msg) => msg.id,
        Err(e) => {
            reject(&*client, format!("invalid identify message: {e}"));
            return Err(VigilError::InvalidArgument(format!(
                "invalid identify message: {e}"
            )));
        }
    };

    match registry.attach(id, Arc::clone(&client)) {
        Ok(()) => Ok(id),
        Err(e) => {
            reject(&*client, e.to_string());
            Err(e)
        }
    }
}

fn reject(client: &dyn ClientSink, message: String) {
    let failure = BindFailure::new(message);
    if let Ok(text) = serde_json::to_string(&failure) {
        let _ = client.send_text(text);
    }
    client.close("bind failed");
}
