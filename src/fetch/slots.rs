//! Logical slots: "the current request for this piece of state".
//!
//! Starting a request in a slot cancels whatever the slot was running, and a
//! ticket lets the finished request check it is still the slot's latest before
//! committing its result.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Handle for one request registered in a slot.
#[derive(Debug, Clone)]
pub struct SlotTicket {
  slot: String,
  generation: u64,
  token: CancellationToken,
}

impl SlotTicket {
  pub fn slot(&self) -> &str {
    &self.slot
  }

  /// Fires when the request is superseded or the slot is cancelled.
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}

struct SlotEntry {
  generation: u64,
  token: CancellationToken,
}

#[derive(Default)]
struct SlotTable {
  next_generation: u64,
  entries: HashMap<String, SlotEntry>,
}

/// Tracks the in-flight request of every slot.
#[derive(Default)]
pub struct SlotRegistry {
  table: Mutex<SlotTable>,
}

impl SlotRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new request in `slot`, cancelling the previous one.
  ///
  /// With a `parent`, the request is also cancelled when the parent is.
  pub fn begin(&self, slot: &str, parent: Option<&CancellationToken>) -> SlotTicket {
    let token = match parent {
      Some(parent) => parent.child_token(),
      None => CancellationToken::new(),
    };

    let mut table = self.table.lock();
    table.next_generation += 1;
    let generation = table.next_generation;

    let previous = table.entries.insert(
      slot.to_string(),
      SlotEntry {
        generation,
        token: token.clone(),
      },
    );
    if let Some(previous) = previous {
      previous.token.cancel();
    }

    SlotTicket {
      slot: slot.to_string(),
      generation,
      token,
    }
  }

  /// Cancel the slot's in-flight request. Returns false if it had none.
  pub fn cancel(&self, slot: &str) -> bool {
    match self.table.lock().entries.remove(slot) {
      Some(entry) => {
        entry.token.cancel();
        true
      }
      None => false,
    }
  }

  /// Whether `ticket` is still the latest request of its slot.
  pub fn is_current(&self, ticket: &SlotTicket) -> bool {
    !ticket.token.is_cancelled()
      && self
        .table
        .lock()
        .entries
        .get(&ticket.slot)
        .is_some_and(|entry| entry.generation == ticket.generation)
  }

  /// Release the slot if `ticket` still owns it.
  pub fn finish(&self, ticket: &SlotTicket) {
    let mut table = self.table.lock();
    let owned = table
      .entries
      .get(&ticket.slot)
      .is_some_and(|entry| entry.generation == ticket.generation);
    if owned {
      table.entries.remove(&ticket.slot);
    }
  }

  /// Like [`begin`](Self::begin), but the slot is released when the returned
  /// guard is dropped, even if the request never completes.
  pub fn enter(&self, slot: &str, parent: Option<&CancellationToken>) -> SlotGuard<'_> {
    SlotGuard {
      registry: self,
      ticket: self.begin(slot, parent),
    }
  }

  /// Number of slots with a request in flight.
  pub fn in_flight(&self) -> usize {
    self.table.lock().entries.len()
  }
}

/// Holds a slot for the lifetime of one request.
pub struct SlotGuard<'a> {
  registry: &'a SlotRegistry,
  ticket: SlotTicket,
}

impl SlotGuard<'_> {
  pub fn ticket(&self) -> &SlotTicket {
    &self.ticket
  }
}

impl Drop for SlotGuard<'_> {
  fn drop(&mut self) {
    self.registry.finish(&self.ticket);
  }
}
