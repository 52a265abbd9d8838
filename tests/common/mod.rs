//! Shared fixtures and proptest strategies for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use exofork::memlayout::{PGSIZE, UTEXT};
use exofork::sim::{self, MachineConfig, Process, SharedMachine};
use exofork::{fork, EnvId, ForkOutcome, Pte, Runtime, VirtAddr};
use proptest::prelude::*;

pub const TEXT: VirtAddr = VirtAddr::new(UTEXT);
pub const DATA: VirtAddr = VirtAddr::new(UTEXT + PGSIZE);

/// Pages a generated layout may use, spanning two page directory entries
pub const LAYOUT_PAGES: usize = 2048;

// ════════════════════════════════════════════════════════════
// Fixtures
// ════════════════════════════════════════════════════════════

pub fn machine() -> SharedMachine {
    sim::boot(MachineConfig { nenv: 16, npages: 96 })
}

/// A fresh environment with `pages` loaded as (address, writable, contents)
pub fn parent_with(machine: &SharedMachine, pages: &[(VirtAddr, bool, Vec<u8>)]) -> Runtime<Process> {
    let mut rt = Runtime::new(Process::boot(machine).unwrap());
    for (va, writable, contents) in pages {
        rt.load_segment(*va, contents, *writable).unwrap();
    }
    rt
}

/// Read-only text page and writable data page
pub fn text_and_data(machine: &SharedMachine) -> Runtime<Process> {
    parent_with(
        machine,
        &[(TEXT, false, b"text".to_vec()), (DATA, true, b"parent data".to_vec())],
    )
}

/// Fork `parent` and resume the child up to its return from `fork`
pub fn fork_pair(parent: &mut Runtime<Process>) -> Runtime<Process> {
    let child = match fork(parent).unwrap() {
        ForkOutcome::Parent(child) => child,
        ForkOutcome::Child => panic!("parent resumed as child"),
    };
    let mut rt = parent.continuation(parent.kernel().resume_child(child));
    assert_eq!(fork(&mut rt).unwrap(), ForkOutcome::Child);
    rt
}

pub fn read(machine: &SharedMachine, env: EnvId, va: VirtAddr, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    machine.lock().peek(env, va, &mut buf).unwrap();
    buf
}

pub fn pte(machine: &SharedMachine, env: EnvId, va: VirtAddr) -> Pte {
    machine.lock().pte(env, va.vpn()).unwrap_or_default()
}

pub fn faults(machine: &SharedMachine, env: EnvId) -> u64 {
    machine.lock().faults(env)
}

// ════════════════════════════════════════════════════════════
// Strategies
// ════════════════════════════════════════════════════════════

/// One loaded page: writable flag and fill byte
#[derive(Debug, Clone, Copy)]
pub struct LoadedPage {
    pub writable: bool,
    pub fill: u8,
}

impl LoadedPage {
    pub fn contents(&self) -> Vec<u8> {
        vec![self.fill; 64]
    }
}

/// Page index above `UTEXT`
pub fn page_index() -> impl Strategy<Value = usize> {
    prop_oneof![
        // Dense near the start of text
        0usize..16,
        // Either side of the first directory boundary
        (1024usize - 8)..(1024 + 8),
        0usize..LAYOUT_PAGES,
    ]
}

pub fn loaded_page() -> impl Strategy<Value = LoadedPage> {
    (any::<bool>(), 1u8..=255).prop_map(|(writable, fill)| LoadedPage { writable, fill })
}

/// Address space layout: distinct pages, at least one
pub fn layout() -> impl Strategy<Value = BTreeMap<usize, LoadedPage>> {
    prop::collection::btree_map(page_index(), loaded_page(), 1..12)
}

/// Which side performs a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

pub fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Parent), Just(Side::Child)]
}

pub fn page_va(index: usize) -> VirtAddr {
    TEXT.offset(index * PGSIZE)
}

pub fn load(machine: &SharedMachine, layout: &BTreeMap<usize, LoadedPage>) -> Runtime<Process> {
    let pages: Vec<_> = layout
        .iter()
        .map(|(index, page)| (page_va(*index), page.writable, page.contents()))
        .collect();
    parent_with(machine, &pages)
}
