//! Defines the [`Directory`] of block records.

use core::marker::PhantomData;
use core::ptr::{null_mut, NonNull};

use super::header::{Header, CANARY_SIZE};

/// A singly linked list of every block the allocator currently owns, in append order.
///
/// The links live inside the block headers themselves, so the directory never needs
/// memory of its own.
#[derive(Debug)]
pub struct Directory {
    head: *mut Header,
    tail: *mut Header,
    len: usize,
    free: usize,
}

impl Directory {
    /// Creates an empty Directory.
    #[inline]
    pub const fn new() -> Self {
        Directory {
            head: null_mut(),
            tail: null_mut(),
            len: 0,
            free: 0,
        }
    }

    /// Number of records in the directory.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of records flagged free.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Appends `block` after the last record.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `block` must point to a valid header that is not part of any directory.
    pub unsafe fn push_back(&mut self, block: NonNull<Header>) {
        let block = block.as_ptr();
        (*block).next = null_mut();
        match self.tail.is_null() {
            true => self.head = block,
            false => (*self.tail).next = block,
        }
        self.tail = block;
        self.len += 1;
        if (*block).free {
            self.free += 1;
        }
    }

    /// Returns the first free record able to hold `size` bytes plus a canary, whose usable
    /// region is aligned to `align`. The scan is skipped entirely when no record is free.
    ///
    /// # Safety
    /// Every record in the directory must be valid.
    pub unsafe fn first_fit(&self, size: usize, align: usize) -> Option<NonNull<Header>> {
        if self.free == 0 {
            return None;
        }
        let needed = size.checked_add(CANARY_SIZE)?;
        self.iter().find(|block| {
            let header = unsafe { &*block.as_ptr() };
            header.free && header.size >= needed && header.data as usize % align == 0
        })
    }

    /// Returns the record owning `data` together with its predecessor
    /// (null if the record is the head).
    ///
    /// # Safety
    /// Every record in the directory must be valid.
    pub unsafe fn find(&self, data: *const u8) -> Option<(*mut Header, NonNull<Header>)> {
        let mut prev: *mut Header = null_mut();
        let mut p = self.head;
        while !p.is_null() {
            if (*p).data as *const u8 == data {
                return Some((prev, NonNull::new_unchecked(p)));
            }
            prev = p;
            p = (*p).next;
        }
        None
    }

    /// Flips the occupancy flag of `block`, keeping the free count in sync.
    ///
    /// # Safety
    /// `block` must be part of the directory.
    pub unsafe fn set_free(&mut self, block: NonNull<Header>, free: bool) {
        let block = block.as_ptr();
        match ((*block).free, free) {
            (false, true) => self.free += 1,
            (true, false) => self.free -= 1,
            _ => {}
        }
        (*block).free = free;
    }

    /// Splices `block` out of the directory.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `block` must be part of the directory and `prev` must be its predecessor
    /// as returned by [`find`](Directory::find).
    pub unsafe fn excise(&mut self, prev: *mut Header, block: NonNull<Header>) {
        let block = block.as_ptr();
        let next = (*block).next;
        match prev.is_null() {
            true => {
                debug_assert_eq!(self.head, block);
                self.head = next
            }
            false => {
                debug_assert_eq!((*prev).next, block);
                (*prev).next = next
            }
        }
        if self.tail == block {
            self.tail = prev;
        }
        (*block).next = null_mut();
        self.len -= 1;
        if (*block).free {
            self.free -= 1;
        }
    }

    /// Detaches every record, leaving the directory empty.
    /// Records can still be walked through their `next` links from the returned head.
    pub fn take(&mut self) -> *mut Header {
        let head = self.head;
        *self = Directory::new();
        head
    }

    /// Iterates over the records in append order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head,
            _marker: PhantomData,
        }
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    next: *mut Header,
    _marker: PhantomData<&'a Directory>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<Header>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = NonNull::new(self.next)?;
        self.next = unsafe { (*current.as_ptr()).next };
        Some(current)
    }
}
