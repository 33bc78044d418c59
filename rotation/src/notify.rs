//! Listener fan-out for rotation events.
//!
//! Listeners run inline on the calling thread after the manager has
//! released its state lock, so a listener may call back into the manager.

use parking_lot::RwLock;

use crate::{RotationEvent, RotationEventKind};

pub type RotationListener = Box<dyn Fn(&RotationEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    /// Task lifecycle: initiated, started, completed, failed, cancelled,
    /// rolled back.
    rotation: RwLock<Vec<RotationListener>>,
    approval: RwLock<Vec<RotationListener>>,
    /// Completed or failed executions.
    completion: RwLock<Vec<RotationListener>>,
}

impl Listeners {
    pub(crate) fn add_rotation(&self, listener: RotationListener) {
        self.rotation.write().push(listener);
    }

    pub(crate) fn add_approval(&self, listener: RotationListener) {
        self.approval.write().push(listener);
    }

    pub(crate) fn add_completion(&self, listener: RotationListener) {
        self.completion.write().push(listener);
    }

    pub(crate) fn emit(&self, event: &RotationEvent) {
        use RotationEventKind::*;
        match event.kind {
            RotationApproved => fan_out(&self.approval, event),
            RotationCompleted | RotationFailed => {
                fan_out(&self.rotation, event);
                fan_out(&self.completion, event);
            }
            RotationInitiated | RotationStarted | RotationCancelled | RotationRolledBack => {
                fan_out(&self.rotation, event)
            }
            PolicyCreated | PolicyAssigned | KeyRegistered | KeyArchived => {}
        }
    }
}

fn fan_out(listeners: &RwLock<Vec<RotationListener>>, event: &RotationEvent) {
    for listener in listeners.read().iter() {
        listener(event);
    }
}
