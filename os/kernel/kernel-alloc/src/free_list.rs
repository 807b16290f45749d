use crate::frame::PageFrame;
use crate::phys_mapper::PhysMapper;
use core::ptr;

/// Header stored at the beginning of every **free** frame.
///
/// ```text
/// +----------------------+------------------------------------+
/// | ListNode (header)    |  rest of the frame (junk or stale) |
/// +----------------------+------------------------------------+
/// ^ frame base
/// ```
///
/// The list costs no memory of its own: a free frame is its own list node.
#[repr(C)]
struct ListNode {
    /// Physical address of the next free frame, or [`NIL`].
    next: u64,
}

/// End-of-list marker. Never a valid frame base (not page aligned).
const NIL: u64 = u64::MAX;

/// A LIFO stack of free frames belonging to one core.
///
/// # Invariants
/// - Every frame on the list is free, mapped by the mapper passed to
///   [`push`](Self::push) and [`pop`](Self::pop), and on no other list.
/// - `len` equals the number of frames reachable from `head`.
pub(crate) struct FreeList {
    head: Option<PageFrame>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Push `frame`, writing the list header into its first bytes.
    ///
    /// # Safety
    /// - The caller owns `frame` exclusively and gives it up.
    /// - `mapper` maps `frame` to writable memory.
    pub(crate) unsafe fn push<M: PhysMapper + ?Sized>(&mut self, frame: PageFrame, mapper: &M) {
        let next = self.head.map_or(NIL, PageFrame::base);
        unsafe {
            let node = mapper.frame_ptr(frame).cast::<ListNode>();
            ptr::write_unaligned(node, ListNode { next });
        }
        self.head = Some(frame);
        self.len += 1;
    }

    /// Pop the most recently pushed frame.
    ///
    /// # Safety
    /// - `mapper` maps every frame on this list.
    pub(crate) unsafe fn pop<M: PhysMapper + ?Sized>(&mut self, mapper: &M) -> Option<PageFrame> {
        let frame = self.head?;
        let node = unsafe { ptr::read_unaligned(mapper.frame_ptr(frame).cast::<ListNode>()) };
        self.head = (node.next != NIL).then(|| PageFrame::from_addr(node.next));
        self.len -= 1;
        Some(frame)
    }
}
