//! Per-thread actor identity.
//!
//! Scripted interleavings name their steps by actor (worker index), not by
//! OS thread. Every thread the harness spawns registers its actor here
//! before touching shared state; threads that never register have no actor.

use std::cell::Cell;

thread_local! {
    static ACTOR: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Register the calling thread as `actor`.
pub fn set_actor(actor: usize) {
    ACTOR.with(|cell| cell.set(Some(actor)));
}

/// Forget the calling thread's actor.
pub fn clear_actor() {
    ACTOR.with(|cell| cell.set(None));
}

/// Actor registered on the calling thread.
#[must_use]
pub fn current_actor() -> Option<usize> {
    ACTOR.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_is_thread_local() {
        set_actor(3);
        assert_eq!(current_actor(), Some(3));

        let other = std::thread::spawn(current_actor).join().unwrap();
        assert_eq!(other, None);

        clear_actor();
        assert_eq!(current_actor(), None);
    }
}
