//! Receiver endpoints.
//!
//! A [`ReceiverEndpoint`] is the dispatcher's handle to one IPC peer: a
//! process that registered receivers or asked for a broadcast result. The
//! peer holds the [`EndpointHandle`] (the receiving half); the dispatcher
//! holds cheap clones of the sending half.
//!
//! Liveness is the channel itself. When the peer drops its handle the
//! channel closes, `ReceiverEndpoint::closed` resolves, and the dispatcher
//! runs the same cleanup path as an explicit unregister. There is no
//! polling and no separate death-notification registry.

use intentd_intent::{Extras, Intent};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique, time-ordered endpoint identity (UUID v7).
pub type EndpointId = Uuid;

/// One broadcast delivery as observed by a receiver endpoint.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The record this delivery belongs to.
    pub record_id: Uuid,
    /// The broadcast intent (queue-control flags already resolved).
    pub intent: Intent,
    /// Ordered deliveries must be acknowledged through
    /// `BroadcastDispatcher::finish_receiver`; parallel ones must not.
    pub ordered: bool,
    /// Whether this is a retained sticky replayed to a new registrant.
    pub sticky: bool,
    /// Result state accumulated by earlier receivers in the chain.
    pub result_code: i32,
    pub result_data: Option<String>,
    pub result_extras: Option<Extras>,
    /// Set on the final delivery to the result callback of an ordered
    /// broadcast, after the last receiver has run.
    pub is_final_result: bool,
}

/// Sending half of an endpoint, held by the dispatcher.
#[derive(Debug, Clone)]
pub struct ReceiverEndpoint {
    id: EndpointId,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving half of an endpoint, held by the peer.
#[derive(Debug)]
pub struct EndpointHandle {
    id: EndpointId,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

/// Create a connected endpoint pair.
pub fn endpoint_pair() -> (ReceiverEndpoint, EndpointHandle) {
    let id = Uuid::now_v7();
    let (tx, rx) = mpsc::unbounded_channel();
    (ReceiverEndpoint { id, tx }, EndpointHandle { id, rx })
}

impl ReceiverEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Push a delivery to the peer. An unbounded send never blocks, which
    /// is what lets parallel broadcasts fan out without waiting on any
    /// receiver. Returns `false` if the peer is gone.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }

    /// Whether the peer has dropped its handle.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the peer drops its handle.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

impl EndpointHandle {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Await the next delivery; `None` once the dispatcher side is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Non-blocking receive for tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}
