// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use codec::PacketId;

/// Thread safe pool of packet identifiers.
///
/// Issues the smallest unissued id above the previously issued one, wrapping
/// past 65535 and skipping the reserved id 0. Ids return to the pool through
/// [`PacketIdAllocator::free`] when the terminal acknowledgement of their flow
/// arrives, or in bulk on connection teardown.
///
/// When all 65535 ids are in flight, `next_id` parks the caller until an id
/// is freed, turning exhaustion into back-pressure instead of an error.
#[derive(Debug, Default)]
pub struct PacketIdAllocator {
    inner: Mutex<AllocatorInner>,
    freed: Notify,
}

#[derive(Debug, Default)]
struct AllocatorInner {
    last: u16,
    used: BTreeSet<u16>,
}

impl AllocatorInner {
    fn try_next(&mut self) -> Option<u16> {
        if self.used.len() == usize::from(u16::MAX) {
            return None;
        }
        let mut candidate = if self.last == u16::MAX { 1 } else { self.last + 1 };
        while self.used.contains(&candidate) {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
        }
        self.last = candidate;
        self.used.insert(candidate);
        Some(candidate)
    }
}

impl PacketIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next free packet id.
    ///
    /// Waits when every id is currently issued.
    pub async fn next_id(&self) -> PacketId {
        loop {
            {
                let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(id) = inner.try_next() {
                    return PacketId::new(id);
                }
            }
            self.freed.notified().await;
        }
    }

    /// Return `id` to the pool.
    ///
    /// Freeing an id that was never issued is a no-op.
    pub fn free(&self, id: PacketId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.used.remove(&id.value()) {
            self.freed.notify_one();
        }
    }

    /// Number of ids currently issued.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.used.len()
    }
}
