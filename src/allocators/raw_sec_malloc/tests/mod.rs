use crate::canary::{LcgCanary, SentinelCanary, SENTINEL};
use crate::config::Config;
use crate::diagnostics::capture::Capture;
use crate::header::{CANARY_SIZE, HEADER_ALIGN};
use crate::providers::test_providers::CountingProvider;

use super::*;

type TestMalloc = RawSecMalloc<CountingProvider, SentinelCanary>;

fn allocator(config: Config) -> TestMalloc {
    RawSecMalloc::new(CountingProvider::new(), SentinelCanary::new(), config)
}

fn fill(ptr: *mut u8, len: usize, seed: u8) {
    for i in 0..len {
        unsafe { ptr.add(i).write(seed.wrapping_add(i as u8)) };
    }
}

fn check(ptr: *const u8, len: usize, seed: u8) -> bool {
    (0..len).all(|i| unsafe { ptr.add(i).read() } == seed.wrapping_add(i as u8))
}

#[test]
fn test_1() {
    let allocator = allocator(Config::DEFAULT);

    let mut objects = vec![];
    for size in (1..5000).step_by(97) {
        let p = allocator.allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % HEADER_ALIGN, 0);
        fill(p, size, size as u8);
        objects.push((p, size));
    }
    assert_eq!(allocator.block_count(), objects.len());
    assert_eq!(allocator.provider().acquired, objects.len());

    for (i, &(p, size)) in objects.iter().enumerate() {
        assert!(check(p, size, size as u8), "Block {i} was overwritten.");
        for &(q, other) in &objects[i + 1..] {
            assert!(p as usize + size <= q as usize || q as usize + other <= p as usize);
        }
    }

    for &(p, _) in &objects {
        allocator.release(p);
    }
    assert_eq!(allocator.block_count(), 0);
    assert_eq!(allocator.provider().live(), 0);
}

#[test]
fn test_2() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(32);
    assert!(!p.is_null());

    assert!(allocator.allocate(0).is_null());
    assert!(allocator.allocate(usize::MAX).is_null());
    assert!(allocator.allocate(-1_isize as usize).is_null());
    assert!(allocator.allocate(isize::MAX as usize).is_null());
    assert_eq!(allocator.try_allocate(0), Err(Error::InvalidSize { size: 0 }));
    assert_eq!(
        allocator.try_allocate(usize::MAX),
        Err(Error::InvalidSize { size: usize::MAX })
    );

    assert_eq!(allocator.block_count(), 1);
    assert_eq!(allocator.provider().acquired, 1);
}

#[test]
fn test_3() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.zeroed_allocate(25, 40);
    assert!(!p.is_null());
    assert!(unsafe { core::slice::from_raw_parts(p, 1000) }
        .iter()
        .all(|&b| b == 0));

    assert!(allocator.zeroed_allocate(0, 40).is_null());
    assert!(allocator.zeroed_allocate(40, 0).is_null());
    assert_eq!(
        allocator.try_zeroed_allocate(usize::MAX, 2),
        Err(Error::SizeOverflow {
            count: usize::MAX,
            size: 2
        })
    );
    assert!(allocator.zeroed_allocate(1 << 33, 1 << 33).is_null());
    assert_eq!(allocator.block_count(), 1);
}

#[test]
fn test_4() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(64);
    allocator.release(p);
    assert_eq!(allocator.provider().released, 1);
    assert_eq!(allocator.try_release(p), Err(Error::UnknownPointer { addr: p as usize }));
    allocator.release(p);
    assert_eq!(allocator.provider().released, 1);
    assert_eq!(allocator.block_count(), 0);

    allocator.release(core::ptr::null_mut());
    assert_eq!(allocator.try_release(core::ptr::null_mut()), Err(Error::NullPointer));
}

#[test]
fn test_5() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(100);
    fill(p, 100, 7);

    let q = allocator.resize(p, 300);
    assert!(!q.is_null());
    assert_ne!(p, q);
    assert!(check(q, 100, 7));
    assert_eq!(allocator.block_count(), 1);
    assert_eq!(allocator.is_free(p), None);

    let r = allocator.resize(q, 10);
    assert!(!r.is_null());
    assert!(check(r, 10, 7));
    assert_eq!(allocator.capacity(r), Some(10));
    assert_eq!(allocator.block_count(), 1);
}

#[test]
fn test_6() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(100);
    assert!(allocator.resize(p, 0).is_null());
    assert_eq!(allocator.block_count(), 0);
    assert_eq!(allocator.provider().released, 1);
    allocator.release(p);
    assert_eq!(allocator.provider().released, 1);

    let q = allocator.resize(core::ptr::null_mut(), 48);
    assert!(!q.is_null());
    assert_eq!(allocator.capacity(q), Some(48));
    assert!(allocator.resize(core::ptr::null_mut(), 0).is_null());
    assert_eq!(allocator.block_count(), 1);
}

#[test]
fn test_7() {
    // Three mappings, the 200 byte one is recycled for a 150 byte request.
    let allocator = allocator(Config::RETAIN);
    let p1 = allocator.allocate(100);
    let p2 = allocator.allocate(200);
    let p3 = allocator.allocate(300);
    assert!(!p1.is_null() && !p2.is_null() && !p3.is_null());
    assert!(p1 != p2 && p2 != p3 && p1 != p3);

    allocator.release(p2);
    assert_eq!(allocator.is_free(p2), Some(true));
    assert_eq!(allocator.provider().released, 0);

    let p4 = allocator.allocate(150);
    assert_eq!(p4, p2);
    assert_eq!(allocator.is_free(p4), Some(false));
    assert_eq!(allocator.provider().acquired, 3);
    assert_eq!(allocator.block_count(), 3);
}

#[test]
fn test_8() {
    let allocator = allocator(Config::RETAIN);
    let p1 = allocator.allocate(300);
    let p2 = allocator.allocate(300);
    allocator.release(p2);
    allocator.release(p1);

    // First fit follows append order, not release order.
    assert_eq!(allocator.allocate(100), p1);
    // A free block must leave room for a canary beyond the request.
    let p3 = allocator.allocate(300);
    assert_ne!(p3, p2);
    assert_eq!(allocator.allocate(300 - CANARY_SIZE), p2);
    assert_eq!(allocator.provider().acquired, 3);
}

#[test]
fn test_9() {
    let allocator = allocator(Config::RETAIN);
    let p = allocator.allocate(64);
    fill(p, 64, 1);
    allocator.release(p);
    assert_eq!(allocator.try_release(p), Err(Error::DoubleRelease { addr: p as usize }));
    assert_eq!(allocator.try_resize(p, 10), Err(Error::DoubleRelease { addr: p as usize }));

    // Reused memory is zeroed over the whole capacity.
    let q = allocator.zeroed_allocate(2, 20);
    assert_eq!(q, p);
    assert!(unsafe { core::slice::from_raw_parts(q, 64) }
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn test_10() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(40);
    let slot = allocator.canary_slot(p).unwrap();
    assert_eq!(slot.as_ptr(), unsafe { p.add(40) });
    unsafe { slot.as_ptr().add(3).write(0x00) };

    let capture = Capture::default();
    tracing::subscriber::with_default(capture.subscriber(), || allocator.release(p));

    assert_eq!(allocator.block_count(), 1);
    assert_eq!(allocator.provider().released, 0);
    assert_eq!(allocator.is_free(p), Some(false));
    let out = capture.contents();
    assert!(out.contains("integrity violation"), "{out}");
    assert!(out.contains("ERROR"), "{out}");

    assert!(matches!(
        allocator.try_release(p),
        Err(Error::IntegrityViolation { expected: SENTINEL, .. })
    ));
}

#[test]
fn test_11() {
    // A one byte overflow is caught at release.
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(13);
    unsafe { p.add(13).write(b'!') };
    let err = allocator.try_release(p).unwrap_err();
    assert_eq!(err.level(), tracing::Level::ERROR);
    assert_eq!(allocator.block_count(), 1);

    // Corrupted blocks can not be resized either, and nothing new gets mapped.
    assert!(allocator.resize(p, 100).is_null());
    assert_eq!(allocator.provider().acquired, 1);
}

#[test]
fn test_12() {
    let allocator = allocator(Config::DEFAULT);
    let p = allocator.allocate(16);
    let mut local = [0_u8; 64];
    let foreign = local.as_mut_ptr();

    let capture = Capture::default();
    tracing::subscriber::with_default(capture.subscriber(), || {
        allocator.release(foreign);
        allocator.release(unsafe { p.add(1) });
        assert!(allocator.resize(foreign, 10).is_null());
    });
    assert_eq!(capture.contents().matches("was not allocated here").count(), 3);
    assert_eq!(allocator.block_count(), 1);
    assert_eq!(local, [0; 64]);
}

#[test]
fn test_13() {
    let allocator = RawSecMalloc::new(
        CountingProvider::with_limit(1),
        SentinelCanary::new(),
        Config::DEFAULT,
    );
    let p = allocator.allocate(100);
    fill(p, 100, 9);

    assert_eq!(allocator.try_allocate(10), Err(Error::OutOfMemory { size: 10 }));
    assert!(allocator.zeroed_allocate(1, 10).is_null());
    assert!(allocator.resize(p, 200).is_null());

    assert_eq!(allocator.block_count(), 1);
    assert!(check(p, 100, 9));
    allocator.release(p);
    assert_eq!(allocator.block_count(), 0);
}

#[test]
fn test_14() {
    let mut provider = CountingProvider::new();
    {
        let allocator = RawSecMalloc::new(&mut provider, SentinelCanary::new(), Config::RETAIN);
        let p = allocator.allocate(10);
        allocator.allocate(5000);
        allocator.allocate(1);
        allocator.release(p);
    }
    assert_eq!(provider.acquired, 3);
    assert_eq!(provider.live(), 0);
}

#[test]
fn test_15() {
    let allocator = RawSecMalloc::new(CountingProvider::new(), LcgCanary::with_seed(7), Config::DEFAULT);
    let p1 = allocator.allocate(8);
    let p2 = allocator.allocate(8);
    let c1 = unsafe { allocator.canary_slot(p1).unwrap().as_ptr().cast::<u64>().read_unaligned() };
    let c2 = unsafe { allocator.canary_slot(p2).unwrap().as_ptr().cast::<u64>().read_unaligned() };
    assert_ne!(c1, c2);
    allocator.release(p1);
    allocator.release(p2);
    assert_eq!(allocator.provider().live(), 0);
}

#[test]
fn test_16() {
    let allocator = allocator(Config::DEFAULT);
    let capture = Capture::default();
    tracing::subscriber::with_default(capture.subscriber(), || {
        let p = allocator.allocate(24);
        allocator.release(p);
    });
    let out = capture.contents();
    assert!(out.contains("mapping a new one"), "{out}");
    assert!(out.contains("excised and unmapped"), "{out}");
}

#[test]
fn test_17() {
    let allocator = allocator(Config::DEFAULT);
    let mut objects = vec![];
    for (i, align) in [1, 8, 16, 32, 64, 128, 256, 4096, 1 << 16].into_iter().enumerate() {
        let size = 512 + i * 33;
        let p = allocator.try_allocate_aligned(size, align).unwrap().as_ptr();
        assert_eq!(p as usize % align, 0, "Alignment {align} not honoured.");
        assert_eq!(p as usize % HEADER_ALIGN, 0);
        assert_eq!(allocator.capacity(p), Some(size));
        fill(p, size, i as u8);
        objects.push((p, size, i as u8));
    }
    for &(p, size, seed) in &objects {
        assert!(check(p, size, seed));
    }

    // Over-aligned blocks guard their end like every other block.
    let (p, size, _) = objects[5];
    unsafe { p.add(size).write(0) };
    assert!(matches!(allocator.try_release(p), Err(Error::IntegrityViolation { .. })));
    unsafe { allocator.canary_slot(p).unwrap().as_ptr().cast::<u64>().write_unaligned(SENTINEL) };

    for &(p, ..) in &objects {
        assert_eq!(allocator.try_release(p), Ok(()));
    }
    assert_eq!(allocator.provider().live(), 0);
}

#[test]
fn test_18() {
    let allocator = allocator(Config::DEFAULT);
    assert_eq!(
        allocator.try_allocate_aligned(8, 3),
        Err(Error::UnsupportedAlignment { align: 3 })
    );
    assert_eq!(
        allocator.try_allocate_aligned(8, 0),
        Err(Error::UnsupportedAlignment { align: 0 })
    );
    assert_eq!(
        allocator.try_allocate_aligned(8, 1 << (usize::BITS - 1)),
        Err(Error::InvalidSize { size: 8 })
    );
    assert!(allocator.allocate_aligned(8, 24).is_null());
    assert_eq!(allocator.block_count(), 0);

    let p = allocator.try_allocate_aligned(100, 256).unwrap().as_ptr();
    fill(p, 100, 3);
    let q = allocator.try_resize_aligned(p, 300, 256).unwrap().unwrap().as_ptr();
    assert_eq!(q as usize % 256, 0);
    assert!(check(q, 100, 3));
    assert_eq!(allocator.block_count(), 1);

    let z = allocator.try_zeroed_allocate_aligned(4, 25, 512).unwrap().as_ptr();
    assert_eq!(z as usize % 512, 0);
    assert!(unsafe { core::slice::from_raw_parts(z, 100) }
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn test_19() {
    // Retained blocks are only reused when they satisfy the requested alignment.
    let allocator = allocator(Config::RETAIN);
    let p = allocator.allocate(300);
    allocator.release(p);
    let align = (p as usize).trailing_zeros() as usize;
    let align = 2 << align;

    let q = allocator.try_allocate_aligned(100, align).unwrap().as_ptr();
    assert_eq!(q as usize % align, 0);
    assert_ne!(q, p);
    assert_eq!(allocator.is_free(p), Some(true));
    assert_eq!(allocator.allocate(100), p);
    assert_eq!(allocator.provider().acquired, 2);
}
