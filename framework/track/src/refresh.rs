//! The refresh list: every loco that currently receives periodic
//! state re-transmissions.

use dcs_core::format::LocoFormat;
use dcs_core::speed::Speed;
use embedded_time::duration::Minutes;
use embedded_time::{Clock, Instant};
use heapless::Vec;

use crate::config::MAX_LIVE_LOCOS;

/// Live operational state of one loco.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLoco<C: Clock> {
    pub adr: u16,
    pub format: LocoFormat,
    pub speed: Speed,
    /// Function states F0..F127, one bit each.
    pub funcs: [u32; 4],
    /// When the entry falls off the refresh list.
    pub purge_at: Instant<C>,
    /// Refresh rounds served; control surfaces may hide stale locos.
    pub age: u16,
    /// Next member of the consist ring, when coupled.
    pub consist_next: Option<u16>,
    /// First member of its ring; the cursor only stops here.
    pub consist_head: bool,
    /// Runs backwards inside its consist.
    pub consist_reversed: bool,
}

/// One pending refresh transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshCmd {
    pub adr: u16,
    pub format: LocoFormat,
    pub speed: Speed,
    pub funcs: [u32; 4],
    pub age: u16,
}

struct RingWalk {
    start: u16,
    at: u16,
}

/// Rolling list of locos to keep alive on the track.
pub struct RefreshList<C: Clock> {
    entries: Vec<LiveLoco<C>, MAX_LIVE_LOCOS>,
    cursor: usize,
    ring: Option<RingWalk>,
    purge_minutes: u8,
}

impl<C: Clock> RefreshList<C> {
    pub fn new(purge_minutes: u8) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            ring: None,
            purge_minutes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, adr: u16) -> Option<&LiveLoco<C>> {
        self.entries.iter().find(|e| e.adr == adr)
    }

    pub fn get_mut(&mut self, adr: u16) -> Option<&mut LiveLoco<C>> {
        self.entries.iter_mut().find(|e| e.adr == adr)
    }

    fn deadline(&self, now: Instant<C>) -> Instant<C> {
        now.checked_add(Minutes(self.purge_minutes as u32))
            .unwrap_or(now)
    }

    /// Add the loco if absent and reset its purge deadline.
    pub fn touch(
        &mut self,
        adr: u16,
        format: LocoFormat,
        now: Instant<C>,
    ) -> Option<&mut LiveLoco<C>> {
        let deadline = self.deadline(now);

        if let Some(pos) = self.entries.iter().position(|e| e.adr == adr) {
            let entry = &mut self.entries[pos];
            entry.purge_at = deadline;
            return Some(entry);
        }

        self.entries
            .push(LiveLoco {
                adr,
                format,
                speed: Speed::default(),
                funcs: [0; 4],
                purge_at: deadline,
                age: 0,
                consist_next: None,
                consist_head: false,
                consist_reversed: false,
            })
            .ok()?;

        let pos = self.entries.len() - 1;
        Some(&mut self.entries[pos])
    }

    /// Remove one loco, detaching it from its consist ring first.
    pub fn remove(&mut self, adr: u16) {
        let (next, was_head) = match self.get(adr) {
            Some(e) => (e.consist_next, e.consist_head),
            None => return,
        };

        for entry in self.entries.iter_mut() {
            if entry.consist_next == Some(adr) {
                entry.consist_next = if next == Some(entry.adr) { None } else { next };
            }
        }

        if was_head {
            if let Some(successor) = next.and_then(|n| self.get_mut(n)) {
                successor.consist_head = true;
            }
        }

        if let Some(ring) = &self.ring {
            if ring.at == adr || ring.start == adr {
                self.ring = None;
            }
        }

        self.entries.retain(|e| e.adr != adr);
    }

    /// Couple live records into a consist ring.
    ///
    /// Members must have been touched before; signed addresses mark
    /// reversed members.
    pub fn link_consist(&mut self, members: &[i16]) {
        if members.len() < 2 {
            return;
        }

        for (i, &m) in members.iter().enumerate() {
            let next = members[(i + 1) % members.len()].unsigned_abs();
            if let Some(entry) = self.get_mut(m.unsigned_abs()) {
                entry.consist_next = Some(next);
                entry.consist_head = i == 0;
                entry.consist_reversed = m < 0;
            }
        }
    }

    /// Break a consist ring apart, leaving the members live.
    pub fn unlink_consist(&mut self, members: &[i16]) {
        for &m in members {
            if let Some(entry) = self.get_mut(m.unsigned_abs()) {
                entry.consist_next = None;
                entry.consist_head = false;
                entry.consist_reversed = false;
            }
        }
    }

    fn cmd(entry: &mut LiveLoco<C>) -> RefreshCmd {
        entry.age = entry.age.wrapping_add(1);
        RefreshCmd {
            adr: entry.adr,
            format: entry.format,
            speed: entry.speed,
            funcs: entry.funcs,
            age: entry.age,
        }
    }

    /// Yield the next loco due for a refresh transmission.
    ///
    /// A consisted entry walks its whole ring before the cursor moves
    /// on, so every member sees the shared drive state back to back.
    pub fn next(&mut self) -> Option<RefreshCmd> {
        if self.entries.is_empty() {
            self.ring = None;
            return None;
        }

        if let Some(walk) = &mut self.ring {
            let at = walk.at;
            let start = walk.start;

            if let Some(pos) = self.entries.iter().position(|e| e.adr == at) {
                let next = self.entries[pos].consist_next;
                match next {
                    Some(next) if next != start => self.ring = Some(RingWalk { start, at: next }),
                    _ => {
                        self.ring = None;
                        self.cursor += 1;
                    }
                }
                return Some(Self::cmd(&mut self.entries[pos]));
            }

            // Ring member vanished; fall back to plain traversal.
            self.ring = None;
        }

        // Non-head ring members are served by their head's ring walk.
        let mut pos = self.cursor % self.entries.len();
        for _ in 0..self.entries.len() {
            let entry = &self.entries[pos];
            if entry.consist_next.is_none() || entry.consist_head {
                break;
            }
            self.cursor += 1;
            pos = self.cursor % self.entries.len();
        }

        let (adr, next) = {
            let entry = &self.entries[pos];
            (entry.adr, entry.consist_next)
        };

        match next {
            Some(next) if next != adr => {
                self.ring = Some(RingWalk { start: adr, at: next });
            }
            _ => self.cursor += 1,
        }

        Some(Self::cmd(&mut self.entries[pos]))
    }

    /// Drop entries whose purge deadline passed.
    ///
    /// Returns the removed addresses so the owner can emit events.
    pub fn purge(&mut self, now: Instant<C>) -> Vec<u16, 8> {
        let mut removed: Vec<u16, 8> = Vec::new();

        loop {
            let expired = self.entries.iter().find_map(|e| {
                if now.checked_duration_since(&e.purge_at).is_some() {
                    Some(e.adr)
                } else {
                    None
                }
            });

            match expired {
                Some(adr) => {
                    self.remove(adr);
                    if removed.push(adr).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }

        removed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_time::rate::Fraction;

    #[derive(Debug, Clone, Copy)]
    struct TestClock;

    impl Clock for TestClock {
        type T = u64;
        const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

        fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
            Ok(Instant::new(0))
        }
    }

    fn at(ms: u64) -> Instant<TestClock> {
        Instant::new(ms)
    }

    #[test]
    fn test_touch_and_round_robin() {
        let mut list: RefreshList<TestClock> = RefreshList::new(10);
        list.touch(3, LocoFormat::Dcc28, at(0)).unwrap();
        list.touch(5, LocoFormat::Mm2_14, at(0)).unwrap();

        let a = list.next().unwrap();
        let b = list.next().unwrap();
        let c = list.next().unwrap();
        assert_eq!((a.adr, b.adr, c.adr), (3, 5, 3));
    }

    #[test]
    fn test_touch_is_idempotent() {
        let mut list: RefreshList<TestClock> = RefreshList::new(10);
        list.touch(3, LocoFormat::Dcc28, at(0)).unwrap();
        list.touch(3, LocoFormat::Dcc28, at(1)).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_consist_ring_walk() {
        let mut list: RefreshList<TestClock> = RefreshList::new(10);
        for adr in [5, 7, 9] {
            list.touch(adr, LocoFormat::Mm2_27b, at(0)).unwrap();
        }
        list.link_consist(&[5, -7]);

        // Entry 5 walks its ring (5 then 7) before 9 gets a turn.
        let seq: alloc::vec::Vec<u16> = (0..4).map(|_| list.next().unwrap().adr).collect();
        assert_eq!(seq, [5, 7, 9, 5]);

        assert!(list.get(7).unwrap().consist_reversed);
        assert!(!list.get(5).unwrap().consist_reversed);
    }

    #[test]
    fn test_remove_heals_ring() {
        let mut list: RefreshList<TestClock> = RefreshList::new(10);
        for adr in [5, 7, 9] {
            list.touch(adr, LocoFormat::Mm2_27b, at(0)).unwrap();
        }
        list.link_consist(&[5, -7, 9]);
        list.remove(7);

        assert_eq!(list.get(5).unwrap().consist_next, Some(9));
        assert_eq!(list.get(9).unwrap().consist_next, Some(5));
    }

    #[test]
    fn test_purge_unlinks() {
        let mut list: RefreshList<TestClock> = RefreshList::new(1);
        list.touch(3, LocoFormat::Dcc28, at(0)).unwrap();
        list.touch(5, LocoFormat::Dcc28, at(30_000)).unwrap();

        // One minute after the first touch, only 3 has expired.
        let removed = list.purge(at(60_000));
        assert_eq!(&removed[..], &[3]);
        assert_eq!(list.len(), 1);
        assert!(list.get(5).is_some());
    }

    #[test]
    fn test_age_increments() {
        let mut list: RefreshList<TestClock> = RefreshList::new(10);
        list.touch(3, LocoFormat::Dcc28, at(0)).unwrap();
        assert_eq!(list.next().unwrap().age, 1);
        assert_eq!(list.next().unwrap().age, 2);
    }
}
