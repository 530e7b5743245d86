#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate alloc;

pub mod config_store;
pub mod ini;
pub mod loco_db;

use core::cell::RefCell;

use delegate::delegate;
use dcs_core::decoder::LocoDef;
use dcs_core::format::LocoFormat;
use embedded_storage::Storage as StorageDriver;
use embedded_time::duration::Seconds;
use embedded_time::{Clock, Instant};
use rclite::Rc;

use loco_db::LocoDb;

/// Mutations are collected for this long before one store pass
/// rewrites the whole file.
pub const STORE_DEBOUNCE_S: u32 = 3;

/// Serialised image size reserved for the decoder database.
pub const STORE_IMAGE_BYTES: usize = 8192;

pub trait Storage {
    /// Wipe storage clean
    fn wipe(&mut self);
}

/// A persistent storage trait for loading and storing data.
pub trait PersistentStorage {
    /// Loads the necessary data into the object.
    ///
    /// This method is used to load the required data into the object.
    /// It should be called before using any other methods that rely on the data being loaded.
    fn load(&mut self);

    fn is_dirty(&self) -> bool;

    /// Store if the debounce window elapsed.
    fn flush(&mut self);

    /// Store now, regardless of the debounce window.
    fn force_flush(&mut self);
}

/// Debounce bookkeeping for one backing file.
struct Debounce<C: Clock> {
    dirty_since: Option<Instant<C>>,
    now: Instant<C>,
}

impl<C: Clock> Debounce<C> {
    fn new(now: Instant<C>) -> Self {
        Self {
            dirty_since: None,
            now,
        }
    }

    fn mark(&mut self) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(self.now);
        }
    }

    fn due(&self) -> bool {
        match self.dirty_since {
            Some(since) => {
                let deadline = since
                    .checked_add(Seconds(STORE_DEBOUNCE_S))
                    .unwrap_or(since);
                self.now.checked_duration_since(&deadline).is_some()
            }
            None => false,
        }
    }
}

/// The decoder database bound to its flash image.
///
/// Wraps [`LocoDb`] with the debounced store: every mutation arms a
/// coalescing window, the slow task calls [`PersistentStorage::flush`]
/// and at most one full rewrite happens per window.
pub struct PersistentDb<C: Clock, S: StorageDriver> {
    db: LocoDb,
    driver: Rc<RefCell<S>>,
    offset: u32,
    debounce: Debounce<C>,
}

impl<C: Clock, S: StorageDriver> PersistentDb<C, S> {
    pub fn new(
        default_format: LocoFormat,
        driver: Rc<RefCell<S>>,
        offset: u32,
        now: Instant<C>,
    ) -> Self {
        Self {
            db: LocoDb::new(default_format),
            driver,
            offset,
            debounce: Debounce::new(now),
        }
    }

    /// Advance the debounce clock; call once per slow tick.
    pub fn set_now(&mut self, now: Instant<C>) {
        self.debounce.now = now;
        if self.db.take_dirty() {
            self.debounce.mark();
        }
    }

    pub fn db(&self) -> &LocoDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut LocoDb {
        &mut self.db
    }

    delegate! {
        to self.db {
            pub fn lookup(&self, adr: u16) -> Option<&LocoDef>;
            pub fn loco_count(&self) -> usize;
            pub fn find_by_vid_uid(&self, vid: u8, uid: u32) -> Option<u16>;
            pub fn sorted_by_name(&self) -> heapless::Vec<u16, { loco_db::MAX_LOCOS }>;
            pub fn next_by_name(&self, adr: u16) -> Option<u16>;
            pub fn prev_by_name(&self, adr: u16) -> Option<u16>;
        }
    }

    fn store_image(&mut self) {
        let mut buf = [0u8; STORE_IMAGE_BYTES];
        let offset = self.offset;
        if let Ok(image) = self.db.store(&mut buf) {
            let mut driver = self.driver.borrow_mut();
            // A failed write keeps the dirty window armed so the next
            // pass retries.
            if driver.write(offset, image).is_err() {
                return;
            }
        }
        self.debounce.dirty_since = None;
    }
}

impl<C: Clock, S: StorageDriver> PersistentStorage for PersistentDb<C, S> {
    fn load(&mut self) {
        let mut buf = [0u8; STORE_IMAGE_BYTES];
        let offset = self.offset;
        let ok = {
            let mut driver = self.driver.borrow_mut();
            driver.read(offset, &mut buf).is_ok()
        };
        if ok {
            self.db.load(&buf);
        }
        self.debounce.dirty_since = None;
    }

    fn is_dirty(&self) -> bool {
        self.debounce.dirty_since.is_some()
    }

    fn flush(&mut self) {
        if self.debounce.due() {
            self.store_image();
        }
    }

    fn force_flush(&mut self) {
        if self.is_dirty() {
            self.store_image();
        }
    }
}
