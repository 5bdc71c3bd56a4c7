//! Bounded FIFO of envelopes awaiting transmission.
//!
//! When full, the oldest entry is dropped to make room.

use super::envelope::Envelope;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        OutboundQueue { items: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    /// Append; returns the evicted oldest envelope if the queue was full
    pub fn push_back(&mut self, envelope: Envelope) -> Option<Envelope> {
        let evicted = if self.items.len() >= self.capacity { self.items.pop_front() } else { None };
        self.items.push_back(envelope);
        evicted
    }

    /// Put envelopes back at the head, preserving their order.
    ///
    /// Returns the envelopes evicted from the head when this overflows.
    pub fn requeue_front(&mut self, envelopes: Vec<Envelope>) -> Vec<Envelope> {
        for envelope in envelopes.into_iter().rev() {
            self.items.push_front(envelope);
        }
        let mut evicted = Vec::new();
        while self.items.len() > self.capacity {
            if let Some(oldest) = self.items.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn pop_front(&mut self) -> Option<Envelope> {
        self.items.pop_front()
    }

    /// Remove the envelope with this message id, if queued
    pub fn remove(&mut self, message_id: &str) -> Option<Envelope> {
        let index = self.items.iter().position(|e| e.message_id == message_id)?;
        self.items.remove(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.items.iter()
    }
}
