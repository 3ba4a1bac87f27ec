use std::rc::Rc;

use crate::router::Router;

/// Channel lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A channel with a known destination became usable.
    ChannelOpen { dst: String },
    /// A channel with a known destination went away. Calls routed through
    /// it have already been failed.
    ChannelClosed { dst: String },
}

pub trait Observer {
    fn on_event(&self, router: &mut Router, event: &RouterEvent);
}

impl<F> Observer for F
where
    F: Fn(&mut Router, &RouterEvent),
{
    fn on_event(&self, router: &mut Router, event: &RouterEvent) {
        self(router, event)
    }
}

/// Wrap a closure as an observer handle suitable for
/// [`Router::add_observer`] and [`Router::remove_observer`].
pub fn observer_fn<F>(f: F) -> Rc<dyn Observer>
where
    F: Fn(&mut Router, &RouterEvent) + 'static,
{
    Rc::new(f)
}

/// Observers in registration order, deduplicated by identity.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Vec<Rc<dyn Observer>>,
}

impl ObserverList {
    pub fn add(&mut self, observer: Rc<dyn Observer>) -> bool {
        if self.position(&observer).is_some() {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub fn remove(&mut self, observer: &Rc<dyn Observer>) -> bool {
        match self.position(observer) {
            Some(index) => {
                self.observers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Observers present when an event fires; changes made by them apply
    /// from the next event.
    pub fn snapshot(&self) -> Vec<Rc<dyn Observer>> {
        self.observers.clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    fn position(&self, observer: &Rc<dyn Observer>) -> Option<usize> {
        self.observers
            .iter()
            .position(|known| std::ptr::addr_eq(Rc::as_ptr(known), Rc::as_ptr(observer)))
    }
}
