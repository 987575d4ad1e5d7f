//! Fixed-capacity keystroke queue.
//!
//! A ring buffer over a plain array: `head` is the next slot to read, `tail`
//! the next slot to write, and one slot stays empty so `head == tail` means
//! empty without a separate counter. Keys are delivered oldest first.

use uefi::protocol::simple_text_input::InputKey;

/// Number of keystrokes the queue holds before new ones are dropped.
pub const KEY_QUEUE_CAPACITY: usize = 16;

const SLOTS: usize = KEY_QUEUE_CAPACITY + 1;

/// FIFO of pending keystrokes with a fixed capacity.
#[derive(Debug, Clone)]
pub struct KeyQueue {
    slots: [InputKey; SLOTS],
    head: usize,
    tail: usize,
}

impl KeyQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [InputKey::scan(0); SLOTS],
            head: 0,
            tail: 0,
        }
    }

    /// Returns `true` if no key is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Number of pending keys.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.tail + SLOTS - self.head) % SLOTS
    }

    /// Returns `true` if another push would be dropped.
    #[must_use]
    pub fn is_full(&self) -> bool {
        (self.tail + 1) % SLOTS == self.head
    }

    /// Appends `key`, handing it back if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(key)` when the queue already holds
    /// [`KEY_QUEUE_CAPACITY`] keys.
    pub fn try_push(&mut self, key: InputKey) -> Result<(), InputKey> {
        if self.is_full() {
            return Err(key);
        }
        self.slots[self.tail] = key;
        self.tail = (self.tail + 1) % SLOTS;
        Ok(())
    }

    /// Appends `key`, silently dropping it if the queue is full.
    ///
    /// Returns `false` if the key was dropped.
    pub fn push(&mut self, key: InputKey) -> bool {
        self.try_push(key).is_ok()
    }

    /// Removes and returns the oldest key.
    pub fn pop(&mut self) -> Option<InputKey> {
        if self.is_empty() {
            return None;
        }
        let key = self.slots[self.head];
        self.head = (self.head + 1) % SLOTS;
        Some(key)
    }

    /// Discards every pending key.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

impl Default for KeyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi::protocol::simple_text_input::scan_code;

    fn key(c: u8) -> InputKey {
        InputKey::char(u16::from(c))
    }

    #[test]
    fn delivers_oldest_first() {
        let mut queue = KeyQueue::new();
        assert!(queue.push(key(b'a')));
        assert!(queue.push(InputKey::scan(scan_code::UP)));
        assert!(queue.push(key(b'b')));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop(), Some(key(b'a')));
        assert_eq!(queue.pop(), Some(InputKey::scan(scan_code::UP)));
        assert_eq!(queue.pop(), Some(key(b'b')));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_is_dropped() {
        let mut queue = KeyQueue::new();
        for i in 0..KEY_QUEUE_CAPACITY as u8 {
            assert!(queue.push(key(b'a' + i)));
        }
        assert!(queue.is_full());
        assert_eq!(queue.try_push(key(b'!')), Err(key(b'!')));
        assert!(!queue.push(key(b'?')));
        assert_eq!(queue.len(), KEY_QUEUE_CAPACITY);

        // The queued keys are the first sixteen, untouched by the overflow.
        for i in 0..KEY_QUEUE_CAPACITY as u8 {
            assert_eq!(queue.pop(), Some(key(b'a' + i)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn wraps_around() {
        let mut queue = KeyQueue::new();
        for round in 0..5u8 {
            for i in 0..10 {
                assert!(queue.push(key(round * 10 + i)));
            }
            for i in 0..10 {
                assert_eq!(queue.pop(), Some(key(round * 10 + i)));
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = KeyQueue::new();
        queue.push(key(b'x'));
        queue.push(key(b'y'));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
        assert!(queue.push(key(b'z')));
        assert_eq!(queue.pop(), Some(key(b'z')));
    }
}
