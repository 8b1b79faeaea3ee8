use tokio::sync::oneshot;

use super::{AttachedInstance, outbox::Target};
use crate::{Error, protocol::sd};

pub(crate) enum Control {
    Attach(AttachedInstance),
    /// Send an SD message right away
    Send { target: Target, header: sd::Header },
    /// Timers of an attached instance changed, recompute the next deadline
    Wake,
    /// Withdraw everything and release the socket
    Close,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Control::Attach(instance) => write!(f, "Attach({instance:?})"),
            Control::Send { target, header } => {
                write!(f, "Send({target:?}, {} entries)", header.entries.len())
            }
            Control::Wake => write!(f, "Wake"),
            Control::Close => write!(f, "Close"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ControlMessage {
    pub(crate) control: Control,
    pub(crate) response: oneshot::Sender<Result<(), Error>>,
}

impl ControlMessage {
    pub(crate) fn new(control: Control) -> (Self, oneshot::Receiver<Result<(), Error>>) {
        let (response, receiver) = oneshot::channel();
        (Self { control, response }, receiver)
    }
}
