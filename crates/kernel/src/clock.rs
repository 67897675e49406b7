// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of CoordSpace.
//
// CoordSpace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// CoordSpace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with CoordSpace. If not, see <https://www.gnu.org/licenses/>.

//! Time sources for tuple timestamps and expiry.

use chrono::Utc;
use coordspace_tuplespace::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of the kernel's notion of "now".
///
/// Distributed deployments plug in a clock synchronized across peers; a
/// process on its own uses [`SystemClock`].
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock, optionally shifted by a fixed offset learned from peers.
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    offset_micros: Arc<AtomicI64>,
}

impl SystemClock {
    /// Wall clock with no offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust the offset applied to the wall clock.
    pub fn set_offset_micros(&self, offset: i64) {
        self.offset_micros.store(offset, Ordering::Relaxed);
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let offset = chrono::Duration::microseconds(self.offset_micros.load(Ordering::Relaxed));
        Timestamp::from_datetime(Utc::now() + offset)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            micros: Arc::new(AtomicI64::new(
                start.secs * 1_000_000 + i64::from(start.usecs),
            )),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }

    /// Jump to `at`.
    pub fn set(&self, at: Timestamp) {
        self.micros
            .store(at.secs * 1_000_000 + i64::from(at.usecs), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let micros = self.micros.load(Ordering::SeqCst);
        Timestamp::new(micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::new(100, 999_000));
        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now(), Timestamp::new(101, 1_000));
        clock.set(Timestamp::new(5, 0));
        assert_eq!(clock.now(), Timestamp::new(5, 0));
    }

    #[test]
    fn test_system_clock_offset() {
        let clock = SystemClock::new();
        let before = clock.now();
        clock.set_offset_micros(3_600_000_000);
        let shifted = clock.now();
        assert!(shifted.secs >= before.secs + 3_599);
    }
}
