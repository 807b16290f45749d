use kernel_alloc::{
    AllocError, AllocatorConfig, FrameRange, FreePolicy, PageFrame, PhysMapper,
    PhysicalAllocator, RangeError,
};
use kernel_sync::Cpu;
use kernel_sync::hosted::HostCpu;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

const BASE: u64 = 0x8020_0000;
const FRAME: u64 = PageFrame::SIZE as u64;

#[repr(C, align(4096))]
struct Page([u8; 4096]);

/// Host memory posing as `frames` physical frames at [`BASE`].
struct Machine {
    alloc: Arc<PhysicalAllocator>,
    _mem: Vec<Page>,
}

fn machine(frames: usize, cores: usize, policy: FreePolicy) -> Machine {
    let mut mem: Vec<Page> = (0..frames).map(|_| Page([0; 4096])).collect();
    let mapper = kernel_alloc::DirectMapper::for_region(BASE, mem.as_mut_ptr().cast());
    let range = FrameRange::new(BASE, BASE + frames as u64 * FRAME);
    let config = AllocatorConfig::new(range).with_free_policy(policy);
    let alloc = unsafe { PhysicalAllocator::new(config, mapper, Arc::new(HostCpu::new(cores))) }
        .expect("valid range");
    Machine {
        alloc: Arc::new(alloc),
        _mem: mem,
    }
}

fn frame(i: u64) -> PageFrame {
    PageFrame::from_addr(BASE + i * FRAME)
}

fn bytes(alloc: &PhysicalAllocator, f: PageFrame) -> &[u8] {
    unsafe { std::slice::from_raw_parts(alloc.mapper().frame_ptr(f), PageFrame::SIZE) }
}

#[test]
fn boot_spreads_frames_over_home_cores() {
    HostCpu::bind(0);
    let m = machine(16, 4, FreePolicy::HomeCore);
    assert_eq!(m.alloc.free_frames(), 16);
    for cpu in 0..4 {
        assert_eq!(m.alloc.free_frames_on(cpu), 4);
    }
    assert_eq!(m.alloc.home_cpu(frame(0)), 0);
    assert_eq!(m.alloc.home_cpu(frame(5)), 1);
    assert_eq!(m.alloc.home_cpu(frame(15)), 3);
    assert_eq!(m.alloc.share_count(frame(7)), 0);
}

#[test]
fn allocate_prefers_the_calling_core() {
    HostCpu::bind(2);
    let m = machine(16, 4, FreePolicy::HomeCore);
    let f = m.alloc.allocate().expect("frames available");
    assert_eq!(m.alloc.home_cpu(f), 2);
    assert_eq!(m.alloc.free_frames_on(2), 3);
    assert_eq!(m.alloc.share_count(f), 1);
    assert_eq!(HostCpu::preempt_depth(), 0);
}

#[test]
fn empty_core_steals_exactly_one_frame() {
    HostCpu::bind(0);
    let m = machine(16, 4, FreePolicy::HomeCore);
    let own: Vec<_> = (0..4).map(|_| m.alloc.allocate().unwrap()).collect();
    assert_eq!(m.alloc.free_frames_on(0), 0);

    let stolen = m.alloc.allocate().expect("other cores have frames");
    assert!(!own.contains(&stolen));
    assert_eq!(m.alloc.home_cpu(stolen), 1);
    assert_eq!(m.alloc.free_frames_on(1), 3);
    assert_eq!(m.alloc.free_frames_on(2), 4);
    assert_eq!(m.alloc.free_frames_on(3), 4);
}

#[test]
fn freed_frame_can_be_allocated_again() {
    HostCpu::bind(0);
    let m = machine(8, 2, FreePolicy::HomeCore);
    let p = m.alloc.allocate().unwrap();
    m.alloc.free(p);
    assert_eq!(m.alloc.share_count(p), 0);
    assert_eq!(m.alloc.allocate().unwrap(), p);
}

#[test]
fn shared_frame_returns_with_its_last_owner() {
    HostCpu::bind(0);
    let m = machine(8, 2, FreePolicy::HomeCore);
    let p = m.alloc.allocate().unwrap();
    let free_before = m.alloc.free_frames();

    assert_eq!(m.alloc.increase_share(p), 2);
    m.alloc.free(p);
    assert_eq!(m.alloc.share_count(p), 1);
    assert_eq!(m.alloc.free_frames(), free_before);

    m.alloc.free(p);
    assert_eq!(m.alloc.share_count(p), 0);
    assert_eq!(m.alloc.free_frames(), free_before + 1);
    assert_eq!(m.alloc.allocate().unwrap(), p);
}

#[test]
fn exhaustion_is_reported_and_recoverable() {
    HostCpu::bind(1);
    let m = machine(6, 3, FreePolicy::HomeCore);
    let all: Vec<_> = (0..6).map(|_| m.alloc.allocate().unwrap()).collect();
    assert_eq!(m.alloc.allocate(), Err(AllocError::Exhausted));
    assert_eq!(HostCpu::preempt_depth(), 0);

    m.alloc.free(all[3]);
    assert_eq!(m.alloc.allocate(), Ok(all[3]));
}

#[test]
fn concurrent_allocations_never_hand_out_a_frame_twice() {
    const CORES: usize = 4;
    HostCpu::bind(0);
    let m = machine(64, CORES, FreePolicy::HomeCore);
    let start = Arc::new(Barrier::new(CORES));

    let handles: Vec<_> = (0..CORES)
        .map(|cpu| {
            let alloc = Arc::clone(&m.alloc);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                HostCpu::bind(cpu);
                start.wait();
                let mut got = Vec::new();
                // Churn a little before draining.
                for _ in 0..50 {
                    let f = alloc.allocate().unwrap();
                    alloc.free(f);
                }
                // Nobody drains while another core still churns.
                start.wait();
                while let Ok(f) = alloc.allocate() {
                    got.push(f);
                }
                got
            })
        })
        .collect();

    let frames: Vec<PageFrame> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let distinct: HashSet<_> = frames.iter().copied().collect();
    assert_eq!(frames.len(), 64);
    assert_eq!(distinct.len(), 64);
    assert_eq!(m.alloc.free_frames(), 0);
}

#[test]
fn calling_core_policy_frees_to_the_freeing_core() {
    HostCpu::bind(0);
    let m = machine(8, 4, FreePolicy::CallingCore);
    assert_eq!(m.alloc.free_frames_on(0), 8);

    let p = m.alloc.allocate().unwrap();
    let alloc = Arc::clone(&m.alloc);
    thread::spawn(move || {
        HostCpu::bind(3);
        alloc.free(p);
    })
    .join()
    .unwrap();

    assert_eq!(m.alloc.free_frames_on(0), 7);
    assert_eq!(m.alloc.free_frames_on(3), 1);
}

#[cfg(feature = "poison")]
#[test]
fn frames_are_filled_with_junk() {
    HostCpu::bind(0);
    let m = machine(4, 1, FreePolicy::HomeCore);
    let p = m.alloc.allocate().unwrap();
    assert!(bytes(&m.alloc, p).iter().all(|&b| b == 0x05));

    m.alloc.free(p);
    // The first bytes of a free frame hold the free-list link.
    assert!(bytes(&m.alloc, p)[8..].iter().all(|&b| b == 0x01));
}

#[cfg(feature = "poison")]
#[test]
fn allocation_stays_pinned_until_the_frame_is_filled() {
    use std::sync::Mutex;

    /// Records the calling thread's preemption depth on every frame access.
    struct DepthRecorder {
        inner: kernel_alloc::DirectMapper,
        depths: Mutex<Vec<usize>>,
    }

    impl PhysMapper for DepthRecorder {
        unsafe fn frame_ptr(&self, frame: PageFrame) -> *mut u8 {
            self.depths.lock().unwrap().push(HostCpu::preempt_depth());
            unsafe { self.inner.frame_ptr(frame) }
        }
    }

    HostCpu::bind(0);
    let mut mem: Vec<Page> = (0..4).map(|_| Page([0; 4096])).collect();
    let mapper = DepthRecorder {
        inner: kernel_alloc::DirectMapper::for_region(BASE, mem.as_mut_ptr().cast()),
        depths: Mutex::new(Vec::new()),
    };
    let config = AllocatorConfig::new(FrameRange::new(BASE, BASE + 4 * FRAME));
    let alloc = unsafe { PhysicalAllocator::new(config, mapper, Arc::new(HostCpu::new(1))) }
        .expect("valid range");
    alloc.mapper().depths.lock().unwrap().clear();

    let p = alloc.allocate().unwrap();
    let depths = alloc.mapper().depths.lock().unwrap().clone();
    // Free-list pop, then the junk fill.
    assert_eq!(depths.len(), 2);
    assert!(depths.iter().all(|&d| d == 1), "{depths:?}");
    assert_eq!(HostCpu::preempt_depth(), 0);

    let filled = unsafe {
        std::slice::from_raw_parts(alloc.mapper().inner.frame_ptr(p), PageFrame::SIZE)
    };
    assert!(filled.iter().all(|&b| b == 0x05));
    drop(alloc);
    drop(mem);
}

#[test]
fn allocated_frame_is_writable() {
    HostCpu::bind(0);
    let m = machine(2, 1, FreePolicy::HomeCore);
    let p = m.alloc.allocate().unwrap();
    unsafe { m.alloc.mapper().frame_ptr(p).write_bytes(0xAB, PageFrame::SIZE) };
    assert!(bytes(&m.alloc, p).iter().all(|&b| b == 0xAB));
    m.alloc.free(p);
    assert_eq!(m.alloc.allocate().unwrap(), p);
}

#[test]
#[should_panic(expected = "kfree: 0x80200008 is not a frame of")]
fn freeing_a_misaligned_address_is_fatal() {
    HostCpu::bind(0);
    let m = machine(4, 1, FreePolicy::HomeCore);
    m.alloc.free(PageFrame::from_addr(BASE + 8));
}

#[test]
#[should_panic(expected = "kfree: 0x80204000 is not a frame of")]
fn freeing_outside_the_range_is_fatal() {
    HostCpu::bind(0);
    let m = machine(4, 1, FreePolicy::HomeCore);
    m.alloc.free(frame(4));
}

#[test]
#[should_panic(expected = "is already free")]
fn double_free_is_fatal() {
    HostCpu::bind(0);
    let m = machine(4, 1, FreePolicy::HomeCore);
    let p = m.alloc.allocate().unwrap();
    m.alloc.free(p);
    m.alloc.free(p);
}

#[test]
#[should_panic(expected = "increase_share:")]
fn sharing_a_free_frame_is_fatal() {
    HostCpu::bind(0);
    let m = machine(4, 1, FreePolicy::HomeCore);
    m.alloc.increase_share(frame(2));
}

#[test]
fn construction_rejects_unusable_ranges() {
    struct NoCores;
    impl Cpu for NoCores {
        fn id(&self) -> usize {
            0
        }
        fn count(&self) -> usize {
            0
        }
        fn push_off(&self) {}
        fn pop_off(&self) {}
    }

    let tiny = AllocatorConfig::new(FrameRange::new(BASE + 1, BASE + FRAME));
    let err = unsafe {
        PhysicalAllocator::new(
            tiny,
            kernel_alloc::DirectMapper::identity(),
            Arc::new(HostCpu::new(1)),
        )
    }
    .unwrap_err();
    assert!(matches!(err, RangeError::Empty { .. }));

    let some = AllocatorConfig::new(FrameRange::new(BASE, BASE + FRAME));
    let err = unsafe {
        PhysicalAllocator::new(some, kernel_alloc::DirectMapper::identity(), Arc::new(NoCores))
    }
    .unwrap_err();
    assert_eq!(err, RangeError::NoCpus);

    let err = unsafe {
        PhysicalAllocator::new(
            some,
            kernel_alloc::DirectMapper::identity(),
            Arc::new(HostCpu::new(kernel_info::param::NCPU + 1)),
        )
    }
    .unwrap_err();
    assert!(matches!(err, RangeError::TooManyCpus { .. }));
}
