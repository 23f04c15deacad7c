use std::alloc::{self, Layout};

use vm::config::PAGE_SIZE;
use vm::{AddressSpace, FrameAllocator, PTEFlag, PhysAddr, StackFrameAllocator, VirtAddr};

fn frames(pages: usize) -> StackFrameAllocator {
    let _ = env_logger::builder().is_test(true).try_init();

    let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
    let start = unsafe { alloc::alloc_zeroed(layout) } as usize;
    assert_ne!(start, 0);
    unsafe {
        StackFrameAllocator::new(
            PhysAddr::from(start),
            PhysAddr::from(start + pages * PAGE_SIZE),
        )
    }
}

#[test]
fn fork_and_exit() {
    let mut frames = frames(64);
    let trampoline = frames.alloc_zeroed().unwrap();
    let baseline = frames.allocated();

    let mut parent = AddressSpace::new(&mut frames).unwrap();
    parent.map_trampoline(&mut frames, trampoline.into()).unwrap();
    let image: Vec<u8> = (0..37).collect();
    parent.load_initial(&mut frames, &image).unwrap();
    parent.grow(&mut frames, 3 * PAGE_SIZE, PTEFlag::W).unwrap();

    let message = b"written by the parent\0";
    let va = VirtAddr::new(2 * PAGE_SIZE - 5);
    parent.page_table().copy_out(&mut frames, va, message).unwrap();

    let mut child = AddressSpace::new(&mut frames).unwrap();
    child.map_trampoline(&mut frames, trampoline.into()).unwrap();
    parent.duplicate(&mut frames, &mut child).unwrap();
    assert_eq!(child.size(), 3 * PAGE_SIZE);

    let mut text = [0; 37];
    child.page_table().copy_in(&frames, &mut text, VirtAddr::new(0)).unwrap();
    assert_eq!(text.as_slice(), image.as_slice());

    let mut buf = [0; 64];
    let len = child.page_table().copy_in_str(&frames, &mut buf, va).unwrap();
    assert_eq!(&buf[..=len], message);

    let mut dump = String::new();
    child.page_table().dump(&frames, &mut dump).unwrap();
    log::debug!("child\n{dump}");
    // 根页表下两个分支：低处的用户页与高处的跳板
    assert_eq!(dump.lines().filter(|line| line.starts_with(" ..") && !line.starts_with(" .. ..")).count(), 2);

    child.destroy(&mut frames);
    parent.destroy(&mut frames);
    assert_eq!(frames.allocated(), baseline);
}

#[test]
fn destroy_returns_leaves_and_tables() {
    let mut frames = frames(16);
    let mut space = AddressSpace::new(&mut frames).unwrap();
    space.grow(&mut frames, 3 * PAGE_SIZE, PTEFlag::W).unwrap();
    let before = frames.allocated();

    space.destroy(&mut frames);
    // 3个数据页 + 两级页表 + 根页表
    assert_eq!(before - frames.allocated(), 3 + 2 + 1);
    assert_eq!(frames.allocated(), 0);
}

#[test]
fn sbrk_style_resize() {
    let mut frames = frames(16);
    let mut space = AddressSpace::new(&mut frames).unwrap();
    space.load_initial(&mut frames, b"init").unwrap();
    let before = frames.allocated();

    let old = space.resize(&mut frames, 2 * PAGE_SIZE as isize, PTEFlag::W).unwrap();
    assert_eq!(old, PAGE_SIZE);
    space
        .page_table()
        .copy_out(&mut frames, VirtAddr::new(old), b"heap")
        .unwrap();

    space.resize(&mut frames, -2 * PAGE_SIZE as isize, PTEFlag::W).unwrap();
    assert_eq!(space.size(), PAGE_SIZE);
    assert_eq!(frames.allocated(), before);
    assert!(space
        .page_table()
        .copy_out(&mut frames, VirtAddr::new(old), b"heap")
        .is_err());

    space.destroy(&mut frames);
    assert_eq!(frames.allocated(), 0);
}
