use dcs_core::message::{DecoderMessage, DecoderType, ReplyKind};
use embedded_time::{Clock, Instant};
use heapless::Deque;
use managed::ManagedSlice;

use crate::config::REPLY_QUEUE_DEPTH;

/// What a reply consumer wants to happen after a delivery.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ListenerAction {
    Keep,
    Deregister,
}

/// Reply consumer entry point.
///
/// The opaque context is handed back on every call; the router never
/// interprets it.
pub type ReplyFn = fn(usize, &DecoderMessage) -> ListenerAction;

/// A packet-bound reply consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHook {
    pub f: ReplyFn,
    pub ctx: usize,
}

impl ReplyHook {
    pub fn new(f: ReplyFn, ctx: usize) -> Self {
        Self { f, ctx }
    }
}

/// Filter of a registered reply listener.
///
/// `None` fields are wild cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReplyFilter {
    pub dectype: Option<DecoderType>,
    pub adr: Option<u16>,
    pub kind: Option<ReplyKind>,
}

impl ReplyFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(dectype: DecoderType, adr: u16, kind: ReplyKind) -> Self {
        Self {
            dectype: Some(dectype),
            adr: Some(adr),
            kind: Some(kind),
        }
    }

    pub fn matches(&self, msg: &DecoderMessage) -> bool {
        self.dectype.map_or(true, |t| t == msg.dectype)
            && self.adr.map_or(true, |a| a == msg.adr)
            && self.kind.map_or(true, |k| k == msg.kind)
    }
}

/// One occupied listener slot.
///
/// Callers provide the slot storage (`[None; N]` style) and hand it to
/// [`ReplyRouter::new`]; the slots are managed by the router from then
/// on.
pub struct Listener<C: Clock> {
    filter: ReplyFilter,
    f: ReplyFn,
    ctx: usize,
    deadline: Option<Instant<C>>,
}

/// Error returned by [`ReplyRouter::register`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    /// All listener slots are taken.
    Exhausted,
}

impl core::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            RegisterError::Exhausted => write!(f, "listener slots exhausted"),
        }
    }
}

/// Routes decoder replies to packet-bound hooks and registered
/// listeners.
///
/// Receivers enqueue from their interrupt-adjacent context through
/// [`ReplyRouter::deliver`]; a worker drains the bounded queue with
/// [`ReplyRouter::poll`], so consumer code never runs inside the
/// receive path.
pub struct ReplyRouter<'a, C: Clock> {
    listeners: ManagedSlice<'a, Option<Listener<C>>>,
    queue: Deque<(DecoderMessage, Option<ReplyHook>), REPLY_QUEUE_DEPTH>,
    /// Earliest pending listener deadline; single armed timer.
    next_deadline: Option<Instant<C>>,
}

impl<'a, C: Clock> ReplyRouter<'a, C> {
    /// Create a router over caller-provided listener slots.
    pub fn new<S>(slots: S) -> Self
    where
        S: Into<ManagedSlice<'a, Option<Listener<C>>>>,
    {
        Self {
            listeners: slots.into(),
            queue: Deque::new(),
            next_deadline: None,
        }
    }

    /// Register a listener.
    ///
    /// A new deadline earlier than the armed one re-arms the timeout
    /// horizon.
    pub fn register(
        &mut self,
        filter: ReplyFilter,
        f: ReplyFn,
        ctx: usize,
        deadline: Option<Instant<C>>,
    ) -> Result<(), RegisterError> {
        let slot = self
            .listeners
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(RegisterError::Exhausted)?;

        *slot = Some(Listener {
            filter,
            f,
            ctx,
            deadline,
        });

        if let Some(deadline) = deadline {
            self.next_deadline = match self.next_deadline {
                Some(armed) if armed.checked_duration_since(&deadline).is_none() => Some(armed),
                _ => Some(deadline),
            };
        }

        Ok(())
    }

    /// Drop every listener whose context matches.
    pub fn deregister_ctx(&mut self, ctx: usize) {
        for slot in self.listeners.iter_mut() {
            if slot.as_ref().is_some_and(|l| l.ctx == ctx) {
                *slot = None;
            }
        }
    }

    /// Queue one reply for delivery. Receiver-side entry point.
    ///
    /// When the bounded queue is full the reply is dropped; the
    /// signal path must never stall on a slow consumer.
    pub fn deliver(&mut self, msg: DecoderMessage, hook: Option<ReplyHook>) {
        if self.queue.push_back((msg, hook)).is_err() {
            sig_debug!("router: reply queue full, dropping {}", msg.adr);
        }
    }

    /// Drain queued replies and fire expired listener timeouts.
    ///
    /// Returns how many messages were dispatched.
    pub fn poll(&mut self, now: Instant<C>) -> usize {
        self.poll_with(now, |_| {})
    }

    /// Like [`Self::poll`], with a tap that sees every drained message
    /// before the listeners do. The owner uses it to feed co-located
    /// consumers without registering function pointers for them.
    pub fn poll_with(&mut self, now: Instant<C>, mut tap: impl FnMut(&DecoderMessage)) -> usize {
        let mut dispatched = 0;

        while let Some((msg, hook)) = self.queue.pop_front() {
            tap(&msg);
            if let Some(hook) = hook {
                // Exactly one invocation per relevant reply; a
                // deregistering hook suppresses nothing here because
                // each queued entry carries its own copy.
                let _ = (hook.f)(hook.ctx, &msg);
            }
            self.dispatch(&msg);
            dispatched += 1;
        }

        self.fire_timeouts(now);
        dispatched
    }

    fn dispatch(&mut self, msg: &DecoderMessage) {
        // Restart-on-removal: listeners may deregister (or register
        // new ones) from inside the callback of a later slot, so the
        // walk re-checks occupancy on every index.
        for i in 0..self.listeners.len() {
            let (f, ctx) = match &self.listeners[i] {
                Some(l) if l.filter.matches(msg) => (l.f, l.ctx),
                _ => continue,
            };

            if (f)(ctx, msg) == ListenerAction::Deregister {
                self.listeners[i] = None;
            }
        }
    }

    fn fire_timeouts(&mut self, now: Instant<C>) {
        let armed = match self.next_deadline {
            Some(deadline) if now.checked_duration_since(&deadline).is_some() => deadline,
            _ => return,
        };
        let _ = armed;

        for i in 0..self.listeners.len() {
            let (f, ctx, filter) = match &self.listeners[i] {
                Some(l) => match l.deadline {
                    Some(deadline) if now.checked_duration_since(&deadline).is_some() => {
                        (l.f, l.ctx, l.filter)
                    }
                    _ => continue,
                },
                None => continue,
            };

            // Synthesised timeout carries the filter values back so
            // the consumer can identify the silent request.
            let mut msg = DecoderMessage::new(
                filter.dectype.unwrap_or_default(),
                filter.adr.unwrap_or(0),
                ReplyKind::Timeout,
            );
            if let Some(kind) = filter.kind {
                msg.param = u8::from(kind) as u32;
            }

            self.listeners[i] = None;
            let _ = (f)(ctx, &msg);
        }

        self.rearm();
    }

    fn rearm(&mut self) {
        self.next_deadline = None;
        for slot in self.listeners.iter() {
            if let Some(Listener {
                deadline: Some(deadline),
                ..
            }) = slot
            {
                self.next_deadline = match self.next_deadline {
                    Some(armed) if armed.checked_duration_since(deadline).is_none() => Some(armed),
                    _ => Some(*deadline),
                };
            }
        }
    }

    /// Whether any listener is registered.
    pub fn has_listeners(&self) -> bool {
        self.listeners.iter().any(|slot| slot.is_some())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
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

    static HITS: AtomicUsize = AtomicUsize::new(0);
    static TIMEOUTS: AtomicUsize = AtomicUsize::new(0);

    fn counting(_ctx: usize, msg: &DecoderMessage) -> ListenerAction {
        if msg.kind == ReplyKind::Timeout {
            TIMEOUTS.fetch_add(1, Ordering::Relaxed);
        } else {
            HITS.fetch_add(1, Ordering::Relaxed);
        }
        ListenerAction::Keep
    }

    fn oneshot(_ctx: usize, _msg: &DecoderMessage) -> ListenerAction {
        HITS.fetch_add(1, Ordering::Relaxed);
        ListenerAction::Deregister
    }

    fn pom_reply(adr: u16) -> DecoderMessage {
        DecoderMessage::new(DecoderType::DccMobile, adr, ReplyKind::Pom).with_payload(&[0x2A])
    }

    #[test]
    fn test_filter_wildcards() {
        let msg = pom_reply(77);
        assert!(ReplyFilter::any().matches(&msg));
        assert!(ReplyFilter::exact(DecoderType::DccMobile, 77, ReplyKind::Pom).matches(&msg));
        assert!(!ReplyFilter::exact(DecoderType::DccMobile, 78, ReplyKind::Pom).matches(&msg));
        assert!(!ReplyFilter::exact(DecoderType::M3, 77, ReplyKind::Pom).matches(&msg));
    }

    #[test]
    fn test_dispatch_and_deregister() {
        HITS.store(0, Ordering::Relaxed);
        let mut slots: [Option<Listener<TestClock>>; 4] = [None, None, None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        router
            .register(ReplyFilter::any(), oneshot, 0, None)
            .unwrap();

        router.deliver(pom_reply(77), None);
        router.deliver(pom_reply(77), None);
        assert_eq!(router.poll(at(0)), 2);

        // One-shot listener fired once, then removed itself.
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        assert!(!router.has_listeners());
    }

    #[test]
    fn test_direct_hook_fires_per_reply() {
        HITS.store(0, Ordering::Relaxed);
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let hook = ReplyHook::new(counting, 7);
        router.deliver(pom_reply(3), Some(hook));
        router.poll(at(0));
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_timeout_synthesised() {
        TIMEOUTS.store(0, Ordering::Relaxed);
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        router
            .register(
                ReplyFilter::exact(DecoderType::DccMobile, 77, ReplyKind::Pom),
                counting,
                0,
                Some(at(100)),
            )
            .unwrap();

        router.poll(at(50));
        assert_eq!(TIMEOUTS.load(Ordering::Relaxed), 0);

        router.poll(at(100));
        assert_eq!(TIMEOUTS.load(Ordering::Relaxed), 1);
        assert!(!router.has_listeners());
    }
}
