//! Protocol dispatch: turns one inbound frame into topic-tree mutations and
//! the outbound messages that result.
//!
//! A pure function from an inbound [`Frame`] to a list of [`Effect`]s the
//! reactor must carry out — no I/O happens here. The protocol logic only ever
//! touches the topic tree and produces messages, leaving delivery to the
//! caller, so the fan-out/ordering behavior is unit-testable without a socket.

use crate::codec::Format;
use crate::message::{Frame, Record};
use crate::topic::{ConnId, TopicTree};

/// Something the reactor must do as a result of handling one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Encode `record` in `format` and queue it for `to`.
    Send { to: ConnId, format: Format, record: Record },
    /// Close `conn`'s socket and deregister it, unconditionally — UNSUBSCRIBE
    /// closes the connection whether or not it was actually subscribed to the
    /// named topic.
    Close { conn: ConnId },
}

/// Applies one inbound frame from `from` to the tree and returns the effects
/// it produces. `format` is the connection's negotiated wire format, used to
/// address any reply back to `from`.
pub fn handle(tree: &mut TopicTree, from: ConnId, format: Format, frame: Frame) -> Vec<Effect> {
    match frame {
        Frame::Subscribe { topic } => {
            tree.add_subscriber(&topic, from, format);
            match tree.get(&topic) {
                Some(retained) => {
                    let record = Frame::Send { data: retained.clone() }.into_record();
                    vec![Effect::Send { to: from, format, record }]
                }
                None => Vec::new(),
            }
        }

        Frame::Unsubscribe { topic } => {
            tree.remove_subscriber_single(&topic, from);
            vec![Effect::Close { conn: from }]
        }

        Frame::Publish { topic, msg } => tree
            .publish(&topic, msg.clone())
            .into_iter()
            .map(|(to, format)| {
                let record = Frame::Send { data: msg.clone() }.into_record();
                Effect::Send { to, format, record }
            })
            .collect(),

        Frame::ListRequest => {
            let topics = tree.list_visible();
            let record = Frame::ListReply { topics }.into_record();
            vec![Effect::Send { to: from, format, record }]
        }

        // SEND and REP_TOPICS are server-to-client only; a client that sends
        // one is misusing the protocol, but framing already validated the
        // method name, so there is nothing left to enforce here — treat it
        // as a no-op rather than inventing a new error variant for it.
        Frame::Send { .. } | Frame::ListReply { .. } => Vec::new(),
    }
}
