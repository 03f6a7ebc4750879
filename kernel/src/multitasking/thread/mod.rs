// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements preemptive multitasking, using independent threads of execution.
//!
//! This module allows the kernel to start an arbitrary number of threads,
//! preemptively scheduling between them. Threads can sleep, block, be
//! resumed, and exit as needed.
//!
//! ## Initialisation
//!
//! [`init`] adopts the boot stack as the initial thread, allowing new
//! threads to be created. [`start`] then creates the idle thread and
//! enables interrupts, at which point the timer tick starts driving
//! preemption.
//!
//! ## The thread control block
//!
//! Each thread owns one stack region of [`memory::STACK_SIZE`] bytes.
//! The [`Thread`] structure lives at the base of the region and the
//! thread's kernel stack grows down from the region's top towards it.
//! Because regions are aligned to their own size, the running thread is
//! recovered by rounding the stack pointer down, and a magic word at
//! the end of the structure catches the stack growing into it.
//!
//! ## Scheduling
//!
//! Ready threads wait in a queue ordered by effective priority, FIFO
//! within a priority class. By default priorities are fixed except for
//! donation through contended locks; booting with `-mlfqs` switches to
//! a multilevel-feedback approximation in which `nice` and measured
//! CPU use drive priorities instead.

use crate::arch;
use crate::interrupts::{self, Level};
use crate::memory::{self, PageFlags};
use crate::sync;
use crate::sync::lock::{Donation, LockId};
use alloc::vec::Vec;
use core::arch::asm;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;

pub(crate) mod mlfqs;
mod queue;
pub(crate) mod scheduler;
mod sleep;

pub use sleep::sleep_until;

/// The lowest priority a thread can have.
///
pub const PRI_MIN: i32 = 0;

/// The default priority for new threads.
///
pub const PRI_DEFAULT: i32 = 31;

/// The highest priority a thread can have.
///
pub const PRI_MAX: i32 = 63;

/// The lowest niceness a thread can have.
///
pub const NICE_MIN: i32 = -20;

/// The default niceness for new threads.
///
pub const NICE_DEFAULT: i32 = 0;

/// The highest niceness a thread can have.
///
pub const NICE_MAX: i32 = 20;

/// The number of timer ticks a thread runs before
/// preemption is requested.
///
pub const TIME_SLICE: u64 = 4;

/// The maximum length of a thread's name, in bytes.
///
const NAME_LEN: usize = 16;

/// Magic value stored at the end of every thread control
/// block. The stack grows down towards the block, so this
/// is the first field an overflowing stack destroys, and
/// every dereference checks it.
///
const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Whether [`init`] has completed and the thread system
/// is usable.
///
static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Whether the multilevel-feedback policy was selected at
/// boot. Fixed before [`start`] and never changed after.
///
static USE_MLFQS: AtomicBool = AtomicBool::new(false);

/// The thread adopted from the boot stack. Its stack region
/// was not allocated by us, so it is never freed.
///
static INITIAL_THREAD: AtomicCell<Option<ThreadPtr>> = AtomicCell::new(None);

/// The thread that runs when nothing else is ready.
///
static IDLE_THREAD: AtomicCell<Option<ThreadPtr>> = AtomicCell::new(None);

/// The next thread id to hand out. Serialised by TID_LOCK.
///
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Serialises thread id allocation. A plain semaphore:
/// the allocator needs mutual exclusion, not donation.
///
static TID_LOCK: sync::Semaphore = sync::Semaphore::new(1);

// Tick statistics, printed at shutdown.
//
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);
static KERNEL_TICKS: AtomicU64 = AtomicU64::new(0);
static USER_TICKS: AtomicU64 = AtomicU64::new(0);

/// Called with the incoming thread on every context switch,
/// so an external address-space manager can install the
/// thread's mappings. Absent when only kernel threads exist.
///
static ADDRESS_SPACE_HOOK: AtomicCell<Option<fn(&Thread)>> = AtomicCell::new(None);

/// Called once for every newly initialised thread, so a
/// loader can attach per-thread state.
///
static THREAD_INIT_HOOK: AtomicCell<Option<fn(&Thread)>> = AtomicCell::new(None);

/// The signature of a thread's entry point: a function
/// taking one opaque argument and returning nothing. If the
/// entry point returns, the thread exits.
///
pub type ThreadFunc = fn(usize);

/// Uniquely identifies a thread.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Returns a numerical representation for the thread
    /// ID.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Describes the scheduling state of a thread.
///
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    /// The thread is running. Exactly one thread is in
    /// this state at any moment.
    Running,

    /// The thread is in the ready queue, waiting to run.
    Ready,

    /// The thread is waiting for an event: a wakeup tick,
    /// a semaphore, or an explicit unblock.
    Blocked,

    /// The thread is exiting. Its stack region is freed at
    /// the top of a later schedule, once the thread is no
    /// longer running on it.
    Dying,
}

/// A copyable reference to a thread control block.
///
/// The block lives at the base of the thread's stack region
/// and is destroyed by the scheduler after the thread dies,
/// never while something still queues it.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ThreadPtr(NonNull<Thread>);

// A ThreadPtr is only ever dereferenced with interrupts
// disabled on the single CPU, which serialises all access.
//
unsafe impl Send for ThreadPtr {}
unsafe impl Sync for ThreadPtr {}

impl ThreadPtr {
    /// Returns the raw control-block pointer, which is also
    /// the base of the thread's stack region.
    ///
    pub(super) fn as_raw(&self) -> *mut Thread {
        self.0.as_ptr()
    }
}

impl core::ops::Deref for ThreadPtr {
    type Target = Thread;

    fn deref(&self) -> &Thread {
        unsafe { self.0.as_ref() }
    }
}

impl From<&Thread> for ThreadPtr {
    fn from(thread: &Thread) -> ThreadPtr {
        ThreadPtr(NonNull::from(thread))
    }
}

/// Contains the metadata for a thread of execution.
///
/// The layout is fixed so that `magic` stays the last field
/// in memory: the kernel stack grows down towards the
/// structure, and `magic` must be the first casualty.
///
#[repr(C)]
pub struct Thread {
    // This thread's unique id.
    id: AtomicCell<ThreadId>,

    // A short display name, NUL-padded.
    name: [u8; NAME_LEN],

    // The thread's current scheduling state.
    state: AtomicCell<ThreadState>,

    // The thread's effective priority: the base priority,
    // possibly raised by donations.
    priority: AtomicCell<i32>,

    // The priority set by the thread's owner, before
    // donation.
    base_priority: AtomicCell<i32>,

    // The thread's niceness, used by the feedback policy.
    nice: AtomicCell<i32>,

    // A decaying estimate of recent CPU use, used by the
    // feedback policy.
    recent_cpu: AtomicCell<Fixed>,

    // The absolute tick at which a sleeping thread must be
    // woken. Meaningful only while the thread is in the
    // sleep set.
    wakeup_tick: AtomicCell<u64>,

    // The lock this thread is blocked on, if any, for
    // donation chaining.
    pub(crate) waiting_on: AtomicCell<Option<LockId>>,

    // Priority donations received from threads blocked on
    // locks this thread holds.
    pub(crate) donations: spin::Mutex<Vec<Donation>>,

    // The thread's saved stack pointer. While the thread is
    // executing, this value is stale. When the thread is
    // switched out, its final stack pointer is written here,
    // and switching back in restores it.
    stack_pointer: UnsafeCell<u64>,

    // See THREAD_MAGIC.
    magic: u32,
}

// Thread is not thread-safe by default, as its stack
// pointer is stored in an UnsafeCell. However, we only
// ever access that cell from the scheduler with interrupts
// disabled on the single CPU, so we tell Rust this is fine
// by implementing the Sync trait.
//
unsafe impl Sync for Thread {}

impl Thread {
    /// Does basic initialisation of a blocked thread named
    /// `name`. The caller assigns the id afterwards.
    ///
    fn new(name: &str, priority: i32) -> Thread {
        assert!((PRI_MIN..=PRI_MAX).contains(&priority));

        let mut name_buf = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);

        Thread {
            id: AtomicCell::new(ThreadId(0)),
            name: name_buf,
            state: AtomicCell::new(ThreadState::Blocked),
            priority: AtomicCell::new(priority),
            base_priority: AtomicCell::new(priority),
            nice: AtomicCell::new(NICE_DEFAULT),
            recent_cpu: AtomicCell::new(Fixed::ZERO),
            wakeup_tick: AtomicCell::new(0),
            waiting_on: AtomicCell::new(None),
            donations: spin::Mutex::new(Vec::new()),
            stack_pointer: UnsafeCell::new(0),
            magic: THREAD_MAGIC,
        }
    }

    /// Returns the thread's unique id.
    ///
    pub fn id(&self) -> ThreadId {
        self.id.load()
    }

    /// Returns the thread's display name.
    ///
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    /// Returns the thread's current scheduling state.
    ///
    pub fn state(&self) -> ThreadState {
        self.state.load()
    }

    /// Returns the thread's effective priority.
    ///
    pub fn priority(&self) -> i32 {
        self.priority.load()
    }

    /// Returns the priority set by the thread's owner,
    /// ignoring donations.
    ///
    pub fn base_priority(&self) -> i32 {
        self.base_priority.load()
    }

    /// Overwrites the thread's effective priority, used by
    /// donation and the feedback policy.
    ///
    pub(crate) fn set_priority_value(&self, priority: i32) {
        self.priority.store(priority);
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state);
    }

    /// Asserts that this points at a live thread control
    /// block. A dead magic word means the thread's stack
    /// overflowed into its control block.
    ///
    pub(crate) fn check(&self) {
        assert!(
            self.magic == THREAD_MAGIC,
            "thread control block corrupted (kernel stack overflow?)"
        );
    }

    /// Builds a detached thread control block for queue
    /// tests.
    ///
    #[cfg(test)]
    pub(crate) fn test_thread(name: &str, priority: i32) -> ThreadPtr {
        ThreadPtr(NonNull::from(alloc::boxed::Box::leak(
            alloc::boxed::Box::new(Thread::new(name, priority)),
        )))
    }
}

/// Returns the thread whose stack region holds the CPU's
/// stack pointer, without sanity checks.
///
fn running_ptr() -> ThreadPtr {
    let rsp: u64;
    unsafe {
        asm!("mov {}, rsp", out(reg) rsp, options(nostack, nomem, preserves_flags));
    }

    let base = memory::round_down(rsp);
    ThreadPtr(NonNull::new(base as *mut Thread).expect("stack pointer in the null region"))
}

/// Returns the running thread.
///
/// This is the stack-pointer rounding of `running_ptr` plus
/// a couple of sanity checks: the magic word must be intact
/// and the thread must believe it is running.
///
pub fn current() -> &'static Thread {
    let t = running_ptr();
    let t: &'static Thread = unsafe { &*t.0.as_ptr() };
    t.check();
    assert!(t.state() == ThreadState::Running);

    t
}

/// Returns whether the given thread is the idle thread.
///
fn is_idle(t: &Thread) -> bool {
    match IDLE_THREAD.load() {
        Some(idle) => core::ptr::eq(&*idle, t),
        None => false,
    }
}

/// Returns whether the given thread is the initial thread.
///
pub(super) fn is_initial(t: &Thread) -> bool {
    match INITIAL_THREAD.load() {
        Some(initial) => core::ptr::eq(&*initial, t),
        None => false,
    }
}

/// Returns the idle thread, once it has registered itself.
///
pub(super) fn idle_ptr() -> Option<ThreadPtr> {
    IDLE_THREAD.load()
}

/// Returns whether the multilevel-feedback policy is in
/// effect.
///
pub fn mlfqs_enabled() -> bool {
    USE_MLFQS.load(Ordering::Relaxed)
}

/// Selects the multilevel-feedback policy. Called during
/// boot, before [`start`]; the choice is fixed thereafter.
///
pub(crate) fn select_mlfqs() {
    assert!(!INITIALISED.load(Ordering::Relaxed));
    USE_MLFQS.store(true, Ordering::Relaxed);
}

/// Returns whether [`init`] has completed.
///
pub(crate) fn ready() -> bool {
    INITIALISED.load(Ordering::Relaxed)
}

/// Initialises the thread system by transforming the code
/// that is currently running into a thread. This works only
/// because the boot path placed us on a properly aligned
/// stack region with room for the control block at its
/// base.
///
/// # Panics
///
/// `init` panics if interrupts are enabled or if it has
/// already been called.
///
pub fn init() {
    assert!(interrupts::get_level() == Level::Off);
    assert!(!INITIALISED.load(Ordering::Relaxed), "thread::init called twice");

    // Set up a thread structure for the running thread.
    let initial = running_ptr();
    unsafe { core::ptr::write(initial.0.as_ptr(), Thread::new("main", PRI_DEFAULT)) };
    initial.set_state(ThreadState::Running);
    INITIAL_THREAD.store(Some(initial));
    INITIALISED.store(true, Ordering::Relaxed);

    // Now that current() works, the tid semaphore can be
    // taken.
    initial.id.store(allocate_tid());

    if let Some(hook) = THREAD_INIT_HOOK.load() {
        hook(&initial);
    }
}

/// Starts preemptive scheduling: creates the idle thread
/// and enables interrupts, so the timer tick begins driving
/// preemption.
///
/// Does not return until the idle thread has registered
/// itself.
///
pub fn start() {
    // The idle thread signals this semaphore once it has
    // recorded itself in IDLE_THREAD.
    let idle_started = sync::Semaphore::new(0);
    create(
        "idle",
        PRI_MIN,
        idle,
        &idle_started as *const sync::Semaphore as usize,
    )
    .expect("failed to create the idle thread");

    // Start preemptive thread scheduling.
    interrupts::enable();

    mlfqs::reset();

    // Wait for the idle thread to initialise IDLE_THREAD.
    idle_started.down();
}

/// The idle thread. Executes when no other thread is ready
/// to run.
///
/// It is scheduled once at startup, at which point it
/// records itself, signals the semaphore passed by [`start`]
/// and immediately blocks. After that it never appears in
/// the ready queue; the scheduler picks it directly when
/// the queue is empty.
///
fn idle(idle_started: usize) {
    let idle_started = unsafe { &*(idle_started as *const sync::Semaphore) };

    IDLE_THREAD.store(Some(running_ptr()));
    idle_started.up();

    loop {
        // Let someone else run.
        interrupts::disable();
        block();

        // Back again: nothing else was ready. Open the
        // interrupt gate and wait for the next tick.
        arch::wait_for_interrupt();
    }
}

/// Creates a new kernel thread named `name` with the given
/// priority, which executes `entry(arg)`, and adds it to
/// the ready queue. Returns the new thread's id, or `None`
/// if allocating its stack region fails.
///
/// The new thread may be scheduled, and may even exit,
/// before `create` returns. If it has a higher effective
/// priority than the creator, it runs immediately.
///
pub fn create(name: &str, priority: i32, entry: ThreadFunc, arg: usize) -> Option<ThreadId> {
    assert!((PRI_MIN..=PRI_MAX).contains(&priority));

    // Allocate and initialise the thread control block at
    // the base of a fresh stack region.
    let page = memory::page_alloc(PageFlags::ZERO)?;
    let new = ThreadPtr(page.cast::<Thread>());
    unsafe { core::ptr::write(new.0.as_ptr(), Thread::new(name, priority)) };
    new.id.store(allocate_tid());

    // Build the initial stack frame, so the first switch
    // into the thread lands in the entry trampoline.
    let stack_top = (page.as_ptr() as usize + memory::STACK_SIZE) as *mut u64;
    let rsp = unsafe { arch::prepare_thread_stack(stack_top, entry, arg) };
    unsafe { new.stack_pointer.get().write(rsp) };

    if let Some(hook) = THREAD_INIT_HOOK.load() {
        hook(&new);
    }

    // Add to the ready queue.
    unblock(&new);

    // A higher-priority thread runs before we return.
    if new.priority() > current().priority() {
        yield_now();
    }

    Some(new.id())
}

/// Puts the current thread to sleep. It will not be
/// scheduled again until awoken by [`unblock`].
///
/// This function must be called with interrupts turned off.
/// It is usually a better idea to use one of the
/// synchronisation primitives in [`sync`](crate::sync).
///
pub fn block() {
    assert!(!interrupts::is_external());
    assert!(interrupts::get_level() == Level::Off);

    scheduler::reschedule(ThreadState::Blocked);
}

/// Transitions a blocked thread to the ready queue.
///
/// This does not preempt the running thread, which can be
/// important: the caller may need to atomically unblock a
/// batch of threads and update other data.
///
/// # Panics
///
/// `unblock` panics if the thread is not blocked. (Use
/// [`yield_now`] to make the running thread ready.)
///
pub fn unblock(t: &Thread) {
    t.check();

    let old_level = interrupts::disable();
    assert!(
        t.state() == ThreadState::Blocked,
        "unblock of a thread that is not blocked"
    );
    scheduler::insert_ready(ThreadPtr::from(t));
    t.set_state(ThreadState::Ready);
    interrupts::set_level(old_level);
}

/// Yields the CPU. The current thread is not put to sleep
/// and may be scheduled again immediately at the
/// scheduler's whim.
///
pub fn yield_now() {
    assert!(!interrupts::is_external());

    let curr = current();
    let old_level = interrupts::disable();
    if !is_idle(curr) {
        scheduler::insert_ready(ThreadPtr::from(curr));
    }
    scheduler::reschedule(ThreadState::Ready);
    interrupts::set_level(old_level);
}

/// Deschedules the current thread and destroys it. Never
/// returns to the caller.
///
/// The thread's stack region is freed at the top of a later
/// schedule, once the thread is no longer running on it.
/// The initial thread's region came from the boot path and
/// is never freed.
///
pub fn exit() -> ! {
    assert!(!interrupts::is_external());
    assert!(!is_idle(current()), "idle thread tried to exit");

    interrupts::disable();
    scheduler::reschedule(ThreadState::Dying);
    unreachable!("a dying thread was rescheduled");
}

/// Sets the current thread's base priority and re-derives
/// its effective priority from the remaining donations.
/// Yields if the head of the ready queue now outranks us.
///
/// Not available under the feedback policy, which computes
/// priorities itself; there this is a no-op.
///
pub fn set_priority(new_priority: i32) {
    assert!((PRI_MIN..=PRI_MAX).contains(&new_priority));

    if mlfqs_enabled() {
        return;
    }

    let curr = current();
    let old_level = interrupts::disable();
    curr.base_priority.store(new_priority);
    refresh_priority(curr);
    interrupts::set_level(old_level);

    preempt_check();
}

/// Returns the current thread's effective priority.
///
pub fn get_priority() -> i32 {
    current().priority()
}

/// Re-derives a thread's effective priority as the maximum
/// of its base priority and its received donations.
///
pub(crate) fn refresh_priority(t: &Thread) {
    let mut priority = t.base_priority.load();
    for donation in t.donations.lock().iter() {
        if donation.priority > priority {
            priority = donation.priority;
        }
    }

    t.priority.store(priority);
}

/// Sets the current thread's niceness, recomputes its
/// priority under the feedback policy, and yields if
/// another thread now outranks us.
///
pub fn set_nice(nice: i32) {
    assert!((NICE_MIN..=NICE_MAX).contains(&nice));

    let curr = current();
    let old_level = interrupts::disable();
    curr.nice.store(nice);
    if mlfqs_enabled() {
        mlfqs::recompute_thread(curr);
    }
    interrupts::set_level(old_level);

    preempt_check();
}

/// Returns the current thread's niceness.
///
pub fn get_nice() -> i32 {
    current().nice.load()
}

/// Returns 100 times the system load average, rounded to
/// the nearest integer.
///
pub fn get_load_avg() -> i32 {
    interrupts::without_interrupts(|| (mlfqs::load_avg() * 100).round())
}

/// Returns 100 times the current thread's `recent_cpu`,
/// rounded to the nearest integer.
///
pub fn get_recent_cpu() -> i32 {
    interrupts::without_interrupts(|| (current().recent_cpu.load() * 100).round())
}

/// Yields to the head of the ready queue if it has a higher
/// effective priority than the current thread. In external
/// interrupt context the switch is deferred until the
/// handler unwinds.
///
pub(crate) fn preempt_check() {
    let old_level = interrupts::disable();
    let should_yield = match scheduler::front_priority() {
        Some(priority) => priority > current().priority(),
        None => false,
    };
    interrupts::set_level(old_level);

    if should_yield {
        if interrupts::is_external() {
            interrupts::yield_on_return();
        } else {
            yield_now();
        }
    }
}

/// Registers a function called with the incoming thread on
/// every context switch, so an address-space manager can
/// activate the thread's mappings.
///
pub fn set_address_space_hook(hook: fn(&Thread)) {
    ADDRESS_SPACE_HOOK.store(Some(hook));
}

pub(super) fn address_space_hook() -> Option<fn(&Thread)> {
    ADDRESS_SPACE_HOOK.load()
}

/// Registers a function called once for every newly
/// initialised thread, so a loader can attach per-thread
/// state.
///
pub fn set_thread_init_hook(hook: fn(&Thread)) {
    THREAD_INIT_HOOK.store(Some(hook));
}

/// Called by the timer interrupt handler at each timer
/// tick, in external interrupt context.
///
pub(crate) fn on_timer_tick(now: u64) {
    if !ready() {
        return;
    }

    // Update statistics. There are no user processes, so
    // user_ticks never moves.
    let curr = current();
    if is_idle(curr) {
        IDLE_TICKS.fetch_add(1, Ordering::Relaxed);
    } else {
        KERNEL_TICKS.fetch_add(1, Ordering::Relaxed);
    }

    if mlfqs_enabled() {
        mlfqs::on_tick(now);
    }

    // Wake sleepers whose deadline has passed. The hint
    // makes this free when nothing is due.
    if now >= sleep::next_wake() {
        sleep::awake(now);
    }

    // Enforce preemption.
    if scheduler::tick_slice() {
        interrupts::yield_on_return();
    }
}

/// A snapshot of the tick statistics.
///
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
}

/// Returns the tick statistics so far.
///
pub fn stats() -> Stats {
    Stats {
        idle_ticks: IDLE_TICKS.load(Ordering::Relaxed),
        kernel_ticks: KERNEL_TICKS.load(Ordering::Relaxed),
        user_ticks: USER_TICKS.load(Ordering::Relaxed),
    }
}

/// Prints thread statistics.
///
pub fn print_stats() {
    let stats = stats();
    println!(
        "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
        stats.idle_ticks, stats.kernel_ticks, stats.user_ticks
    );
}

/// Returns a tid to use for a new thread.
///
fn allocate_tid() -> ThreadId {
    TID_LOCK.down();
    let tid = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
    TID_LOCK.up();

    tid
}
