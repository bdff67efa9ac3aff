//! Client decode loop.
//!
//! Reads envelopes from the discovery's stdout one at a time and splits them
//! into two streams:
//!
//! | Envelope                 | Goes to                                          |
//! |--------------------------|--------------------------------------------------|
//! | `add` / `remove`         | the active event channel (waits while it is full)|
//! | successful `start_sync`  | promotes the staged event channel, then replies  |
//! | *(anything else)*        | the reply channel, for the next command waiter   |
//!
//! The loop ends on EOF, on an undecodable envelope, or on an `add`/`remove`
//! without a port. In every case the client goes `Dead`, the reason is
//! recorded for later waiters, the reply channel closes, and the active event
//! channel is retired so event consumers observe the end as well.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::client::state::StateMachine;
use crate::models::event::Event;
use crate::models::message::{event_type, Message};
use crate::protocol::codec::EnvelopeCodec;
use crate::{AppError, Result};

/// Run the decode loop until the stream ends or turns malformed.
///
/// Replies are pushed into `reply_tx`; dropping it on return is what wakes a
/// command waiter blocked on a dead stream.
pub async fn run_decode_loop<R>(
    discovery_id: String,
    stdout: R,
    machine: Arc<StateMachine>,
    reply_tx: mpsc::Sender<Message>,
) where
    R: AsyncRead + Unpin + Send,
{
    let reason = decode_until_failure(&discovery_id, stdout, &machine, &reply_tx).await;

    match &reason {
        AppError::Transport(_) => {
            info!(discovery_id, reason = %reason, "discovery decode loop stopped");
        }
        _ => warn!(discovery_id, error = %reason, "discovery decode loop failed"),
    }

    machine.stream_ended(reason);
    drop(reply_tx);
    machine.close_events().await;
}

/// Decode envelopes until one can no longer be handled; return why.
async fn decode_until_failure<R>(
    discovery_id: &str,
    stdout: R,
    machine: &StateMachine,
    reply_tx: &mpsc::Sender<Message>,
) -> AppError
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, EnvelopeCodec::new());

    loop {
        let envelope = match framed.next().await {
            None => {
                return AppError::Transport(format!(
                    "discovery {discovery_id} closed its output stream"
                ))
            }
            Some(Err(err)) => return err,
            Some(Ok(envelope)) => envelope,
        };

        let message = match Message::try_from(envelope) {
            Ok(message) => message,
            Err(err) => return err,
        };
        debug!(discovery_id, %message, "received message from discovery");

        if let Err(err) = route_message(discovery_id, message, machine, reply_tx).await {
            return err;
        }
    }
}

/// Route one decoded message to the event channel or the reply channel.
async fn route_message(
    discovery_id: &str,
    message: Message,
    machine: &StateMachine,
    reply_tx: &mpsc::Sender<Message>,
) -> Result<()> {
    match message {
        Message::Add(port) => machine.deliver(Event::add(port, discovery_id)).await,
        Message::Remove(port) => machine.deliver(Event::remove(port, discovery_id)).await,
        reply => {
            if reply.is_ok_reply(event_type::START_SYNC) && machine.activate_staged_events().await
            {
                debug!(discovery_id, "event channel activated");
            }
            reply_tx.send(reply).await.map_err(|_| {
                AppError::Transport(format!("discovery {discovery_id} client was dropped"))
            })?;
        }
    }
    Ok(())
}
