//! Intrusive doubly linked list backing the usage registry.
//!
//! The list is ordered from most recently used (front, right after the head
//! sentinel) to least recently used (back, right before the tail sentinel).
//! Nodes are heap allocated and handed out as raw pointers so that an external
//! index can reach any node in O(1).

use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

/// A node in the doubly linked list.
///
/// Contains a value and pointers to the previous and next nodes.
/// This structure is not meant to be used directly by users of the `List`.
pub(crate) struct Node<T> {
    /// The value stored in this node. Uses MaybeUninit to allow for sigil nodes.
    val: mem::MaybeUninit<T>,
    prev: *mut Node<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn new(val: T) -> Self {
        Node {
            val: mem::MaybeUninit::new(val),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Creates a sentinel node without initializing the value.
    fn new_sigil() -> Self {
        Node {
            val: mem::MaybeUninit::uninit(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Returns a reference to the value of this node.
    ///
    /// # Safety
    ///
    /// The value must be initialized, i.e. this must not be a sigil node.
    #[cfg(test)]
    pub(crate) unsafe fn value(&self) -> &T {
        self.val.assume_init_ref()
    }

    /// Consumes a detached node and moves its value out.
    ///
    /// # Safety
    ///
    /// The value must be initialized, i.e. this must not be a sigil node.
    pub(crate) unsafe fn into_value(self: Box<Self>) -> T {
        self.val.assume_init_read()
    }
}

/// An unbounded doubly linked list with sentinel head and tail nodes.
pub(crate) struct List<T> {
    len: usize,
    head: *mut Node<T>,
    tail: *mut Node<T>,
}

impl<T> List<T> {
    /// Creates an empty list with its two sentinels linked together.
    pub(crate) fn new() -> List<T> {
        let head = Box::into_raw(Box::new(Node::new_sigil()));
        let tail = Box::into_raw(Box::new(Node::new_sigil()));

        // SAFETY: head and tail are newly allocated and valid pointers
        unsafe {
            (*head).next = tail;
            (*tail).prev = head;
        }

        List { len: 0, head, tail }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocates a node for `v` and links it at the front of the list.
    ///
    /// Returns a pointer to the new node; it stays valid until the node is
    /// removed from the list or the list is dropped.
    pub(crate) fn push_front(&mut self, v: T) -> *mut Node<T> {
        // SAFETY: Box::into_raw never returns null
        let node = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(Node::new(v)))) };
        // SAFETY: node is newly allocated and not part of any list yet
        unsafe { self.attach(node.as_ptr()) };
        self.len += 1;
        node.as_ptr()
    }

    /// Unlinks the last (least recently used) node and returns it.
    pub(crate) fn remove_last(&mut self) -> Option<Box<Node<T>>> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the list is not empty, so tail.prev is a real node
        let prev = unsafe { (*self.tail).prev };
        if prev == self.head {
            return None;
        }
        // SAFETY: prev is a live node of this list
        unsafe {
            self.detach(prev);
            self.len -= 1;
            Some(Box::from_raw(prev))
        }
    }

    /// Unlinks `node` and hands ownership of it back to the caller.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sigil node of this list.
    pub(crate) unsafe fn remove(&mut self, node: *mut Node<T>) -> Option<Box<Node<T>>> {
        if self.is_empty() || node.is_null() || node == self.head || node == self.tail {
            return None;
        }
        self.detach(node);
        self.len -= 1;
        Some(Box::from_raw(node))
    }

    /// Moves `node` right behind the head sentinel.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sigil node of this list.
    pub(crate) unsafe fn move_to_front(&mut self, node: *mut Node<T>) {
        if node.is_null() || node == self.head || node == self.tail {
            return;
        }
        if (*self.head).next == node {
            return;
        }
        self.detach(node);
        self.attach(node);
    }

    /// Drops every node, running the destructors of their values.
    pub(crate) fn clear(&mut self) {
        while let Some(node) = self.remove_last() {
            // SAFETY: remove_last never yields a sigil
            drop(unsafe { node.into_value() });
        }
    }

    /// # Safety
    ///
    /// `node` must be linked into this list.
    unsafe fn detach(&mut self, node: *mut Node<T>) {
        (*(*node).prev).next = (*node).next;
        (*(*node).next).prev = (*node).prev;
    }

    /// # Safety
    ///
    /// `node` must be valid and not currently linked into this list.
    unsafe fn attach(&mut self, node: *mut Node<T>) {
        (*node).next = (*self.head).next;
        (*node).prev = self.head;
        (*self.head).next = node;
        (*(*node).next).prev = node;
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        self.clear();

        // SAFETY: head and tail were allocated in `new` and are only freed here
        unsafe {
            if !self.head.is_null() {
                drop(Box::from_raw(self.head));
                self.head = ptr::null_mut();
            }
            if !self.tail.is_null() {
                drop(Box::from_raw(self.tail));
                self.tail = ptr::null_mut();
            }
        }
    }
}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List").field("length", &self.len).finish()
    }
}
