use crate::types::RawFrame;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use vane::logging::{self, Logger};

/// Index of the static pool. It is deployed at startup and never freed.
const STATIC_POOL: usize = 0;

/// Buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of frames in the static pool
    pub static_backlog: usize,
    /// Number of frames in each dynamic pool
    pub dynamic_backlog: usize,
    /// Maximal number of dynamic pools
    pub dynamic_increments: usize,
    /// Keep buffered frames across reconnects. Without history no dynamic
    /// pools are created and the queue is flushed on reconnect.
    pub history: bool,
    /// Enable the garbage collector
    pub gc: bool,
    /// Garbage collector interval in seconds
    pub gc_interval: u64,
    /// Garbage collector threshold divisor
    pub gc_level: usize,
}

impl Default for BufferConfig {
    fn default() -> BufferConfig {
        BufferConfig {
            static_backlog: 200,
            dynamic_backlog: 1000,
            dynamic_increments: 1080,
            history: false,
            gc: false,
            gc_interval: 120,
            gc_level: 2,
        }
    }
}

impl BufferConfig {
    /// Fixes up inconsistent settings, warning about each adjustment.
    pub fn fix(&mut self, log: &Logger) {
        if self.static_backlog < 2 {
            self.static_backlog = 2;
            logging::warn!(log, "buffer.static_backlog was increased to 2");
        }

        if self.gc_level == 0 {
            self.gc_level = 1;
            logging::warn!(log, "buffer.gc_level was increased to 1");
        }

        if self.gc && !self.history {
            self.gc = false;
            logging::warn!(
                log,
                "ignoring buffer.gc because buffer.history is not enabled"
            );
        }
    }
}

/// Buffer statistics snapshot.
#[derive(Debug, Default, Clone)]
pub struct BufferStatistics {
    pub queue_size: usize,
    pub pool_size: usize,
    pub dyn_pools: usize,
    pub max_queue_size: usize,
    pub discarded_cur: u64,
    pub discarded_all: u64,
    pub discarded_max: u64,
    pub uncollected_pools: u64,
    pub dyn_pools_all: u64,
    pub dyn_pools_max: usize,
    pub gc_runs: u64,
    pub flushes: u64,
}

/// Slot identity: owning pool and index within it. Slots never move.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct SlotId {
    pool: usize,
    idx: usize,
}

/// A frame plus its intrusive links. The links thread the slot onto
/// exactly one of the free list, the queue or its pool's collect list,
/// unless it is in flight at the producer or consumer.
struct Slot {
    frame: RawFrame,
    next: Option<SlotId>,
    prev: Option<SlotId>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            frame: RawFrame::new(),
            next: None,
            prev: None,
        }
    }
}

/// Intrusive doubly-linked list head. The nodes are the slots themselves.
#[derive(Debug, Copy, Clone)]
struct List {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl List {
    fn new() -> List {
        List {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

/// Selector for the list a slot operation works on.
#[derive(Debug, Copy, Clone)]
enum ListId {
    Free,
    Queue,
    Collect(usize),
}

/// A contiguous run of slots. Dynamic pools additionally accumulate
/// collected slots during the first garbage collection stage.
struct Pool {
    slots: Vec<Slot>,
    collect: List,
}

impl Pool {
    /// Allocates a pool of `size` slots. Returns None if the allocation
    /// fails; pool growth is never fatal.
    fn alloc(size: usize) -> Option<Pool> {
        let mut slots = Vec::new();
        if slots.try_reserve_exact(size).is_err() {
            return None;
        }

        for _ in 0..size {
            slots.push(Slot::new());
        }

        Some(Pool {
            slots,
            collect: List::new(),
        })
    }
}

struct BufferInner {
    /// All pools; index 0 is the static pool. Destroyed dynamic pools
    /// leave a reusable None entry so slot ids stay stable.
    pools: Vec<Option<Pool>>,
    dyn_count: usize,
    dyn_max: usize,
    /// Unused slots
    free: List,
    /// Committed frames in commit order
    queue: List,
    /// In-flight producer slot
    producer: Option<SlotId>,
    /// In-flight consumer slot
    consumer: Option<SlotId>,
    stats: BufferStatistics,
    dynamic_backlog: usize,
}

impl BufferInner {
    #[inline]
    fn slot(&self, id: SlotId) -> &Slot {
        &self.pools[id.pool].as_ref().expect("slot of destroyed pool").slots[id.idx]
    }

    #[inline]
    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.pools[id.pool]
            .as_mut()
            .expect("slot of destroyed pool")
            .slots[id.idx]
    }

    #[inline]
    fn list_mut(&mut self, list: ListId) -> &mut List {
        match list {
            ListId::Free => &mut self.free,
            ListId::Queue => &mut self.queue,
            ListId::Collect(pool) => {
                &mut self.pools[pool].as_mut().expect("collect of destroyed pool").collect
            }
        }
    }

    fn push_tail(&mut self, list: ListId, id: SlotId) {
        let tail = self.list_mut(list).tail;

        {
            let slot = self.slot_mut(id);
            slot.prev = tail;
            slot.next = None;
        }

        match tail {
            Some(tail) => self.slot_mut(tail).next = Some(id),
            None => self.list_mut(list).head = Some(id),
        }

        let list = self.list_mut(list);
        list.tail = Some(id);
        list.len += 1;
    }

    fn push_head(&mut self, list: ListId, id: SlotId) {
        let head = self.list_mut(list).head;

        {
            let slot = self.slot_mut(id);
            slot.next = head;
            slot.prev = None;
        }

        match head {
            Some(head) => self.slot_mut(head).prev = Some(id),
            None => self.list_mut(list).tail = Some(id),
        }

        let list = self.list_mut(list);
        list.head = Some(id);
        list.len += 1;
    }

    fn pop_head(&mut self, list: ListId) -> Option<SlotId> {
        let head = self.list_mut(list).head?;
        let next = self.slot(head).next;

        match next {
            Some(next) => self.slot_mut(next).prev = None,
            None => self.list_mut(list).tail = None,
        }

        {
            let list = self.list_mut(list);
            list.head = next;
            list.len -= 1;
        }

        let slot = self.slot_mut(head);
        slot.next = None;
        slot.prev = None;

        Some(head)
    }

    fn unlink(&mut self, list: ListId, id: SlotId) {
        let (prev, next) = {
            let slot = self.slot(id);
            (slot.prev, slot.next)
        };

        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.list_mut(list).head = next,
        }

        match next {
            Some(next) => self.slot_mut(next).prev = prev,
            None => self.list_mut(list).tail = prev,
        }

        self.list_mut(list).len -= 1;

        let slot = self.slot_mut(id);
        slot.next = None;
        slot.prev = None;
    }

    /// Splices all slots of `src` onto the tail of `dst`, emptying `src`.
    fn concat(&mut self, dst: ListId, src: ListId) {
        let src_list = *self.list_mut(src);
        if src_list.len == 0 {
            return;
        }

        let dst_tail = self.list_mut(dst).tail;
        match dst_tail {
            Some(tail) => {
                self.slot_mut(tail).next = src_list.head;
                if let Some(head) = src_list.head {
                    self.slot_mut(head).prev = Some(tail);
                }
                let dst = self.list_mut(dst);
                dst.tail = src_list.tail;
                dst.len += src_list.len;
            }
            None => *self.list_mut(dst) = src_list,
        }

        *self.list_mut(src) = List::new();
    }

    /// Deploys a pool at `pool_idx`: links all its slots onto the free list.
    fn deploy(&mut self, pool_idx: usize) {
        let size = self.pools[pool_idx].as_ref().expect("deploying destroyed pool").slots.len();
        for idx in 0..size {
            self.push_tail(ListId::Free, SlotId { pool: pool_idx, idx });
        }
    }

    /// Creates and deploys a new dynamic pool.
    fn create_dyn_pool(&mut self) -> bool {
        let pool = match Pool::alloc(self.dynamic_backlog) {
            Some(pool) => pool,
            None => return false,
        };

        let idx = match self.pools.iter().position(Option::is_none) {
            Some(idx) => {
                self.pools[idx] = Some(pool);
                idx
            }
            None => {
                self.pools.push(Some(pool));
                self.pools.len() - 1
            }
        };

        self.deploy(idx);
        self.dyn_count += 1;

        self.stats.dyn_pools_all += 1;
        if self.dyn_count > self.stats.dyn_pools_max {
            self.stats.dyn_pools_max = self.dyn_count;
        }

        true
    }

    /// Reverts the first garbage collection stage for one dynamic pool:
    /// splices its collect list back into the free list.
    fn uncollect(&mut self) -> bool {
        for idx in STATIC_POOL + 1..self.pools.len() {
            let collected = match &self.pools[idx] {
                Some(pool) => pool.collect.len > 0,
                None => false,
            };

            if collected {
                self.concat(ListId::Free, ListId::Collect(idx));
                return true;
            }
        }

        false
    }

    /// Takes a slot for the producer. Always succeeds, never waits: grows
    /// the pool set on demand and sacrifices the oldest committed frame
    /// as the last resort.
    fn take_for_producer(&mut self, log: &Logger) -> SlotId {
        if let Some(id) = self.pop_head(ListId::Free) {
            self.stats.discarded_cur = 0;
            return id;
        }

        if self.uncollect() {
            logging::debug!(log, "uncollected pool");
            self.stats.uncollected_pools += 1;
            self.stats.discarded_cur = 0;
            return self
                .pop_head(ListId::Free)
                .expect("uncollect left the free list empty");
        }

        if self.dyn_count < self.dyn_max && self.create_dyn_pool() {
            logging::debug!(log, "created another pool";
                            "dyn_pools" => self.dyn_count,
                            "dyn_max" => self.dyn_max);
            self.stats.discarded_cur = 0;
            return self
                .pop_head(ListId::Free)
                .expect("deployed pool left the free list empty");
        }

        self.stats.discarded_cur += 1;
        self.stats.discarded_all += 1;
        if self.stats.discarded_cur > self.stats.discarded_max {
            self.stats.discarded_max = self.stats.discarded_cur;
        }

        self.pop_head(ListId::Queue)
            .expect("both free list and queue empty")
    }

    /// First stage: moves every free slot owned by a dynamic pool onto its
    /// pool's collect list. The move is reversible via uncollect.
    fn collect_pools(&mut self) {
        let mut cur = self.free.head;

        while let Some(id) = cur {
            cur = self.slot(id).next;

            if id.pool != STATIC_POOL {
                self.unlink(ListId::Free, id);
                self.push_head(ListId::Collect(id.pool), id);
            }
        }
    }

    /// Second stage: frees every dynamic pool whose slots are all collected.
    fn destroy_unused_pools(&mut self) {
        for idx in STATIC_POOL + 1..self.pools.len() {
            let fully_collected = match &self.pools[idx] {
                Some(pool) => pool.collect.len == pool.slots.len(),
                None => false,
            };

            if fully_collected {
                self.pools[idx] = None;
                self.dyn_count -= 1;
            }
        }
    }

    /// Two stages so that a slot the producer is about to reuse is never
    /// freed: the first stage only moves slots aside, and the producer
    /// consults those side lists before growing.
    fn gc(&mut self, log: &Logger) {
        self.stats.gc_runs += 1;
        logging::debug!(log, "running garbage collector";
                        "queue_size" => self.queue.len,
                        "dyn_pools" => self.dyn_count);
        self.collect_pools();
        self.destroy_unused_pools();
    }

    /// Number of live slots across all pools, for the accounting invariant.
    #[cfg(test)]
    fn total_slots(&self) -> usize {
        self.pools
            .iter()
            .filter_map(|pool| pool.as_ref().map(|pool| pool.slots.len()))
            .sum()
    }
}

/// Producer/consumer frame buffer.
///
/// Frames are held in pool slots: one static pool deployed at startup and
/// up to `dynamic_increments` dynamic pools created on demand and reclaimed
/// by the lazy garbage collector. When the pool set is exhausted and cannot
/// grow, the oldest committed frame is sacrificed.
pub struct FrameBuffer {
    inner: Mutex<BufferInner>,
    cond: Condvar,
    history: bool,
    gc_interval: u64,
    gc_level: usize,
    log: Logger,
}

impl FrameBuffer {
    pub fn new(cfg: &BufferConfig, log: &Logger) -> FrameBuffer {
        assert!(cfg.static_backlog >= 2, "static backlog must be at least 2");
        assert!(cfg.gc_level >= 1, "gc level must be at least 1");

        let static_pool = Pool::alloc(cfg.static_backlog)
            .expect("could not allocate the static pool");

        let mut inner = BufferInner {
            pools: vec![Some(static_pool)],
            dyn_count: 0,
            dyn_max: if cfg.history { cfg.dynamic_increments } else { 0 },
            free: List::new(),
            queue: List::new(),
            producer: None,
            consumer: None,
            stats: BufferStatistics::default(),
            dynamic_backlog: cfg.dynamic_backlog,
        };
        inner.deploy(STATIC_POOL);

        FrameBuffer {
            inner: Mutex::new(inner),
            cond: Condvar::new(),
            history: cfg.history,
            gc_interval: cfg.gc_interval,
            gc_level: cfg.gc_level,
            log: log.new(logging::o!()),
        }
    }

    /// Producer: takes a frame slot to fill. Always succeeds, never blocks.
    pub fn new_frame(&self) -> ProducerFrame<'_> {
        let mut inner = self.inner.lock().unwrap();

        assert!(
            inner.producer.is_none(),
            "a producer frame is already in flight"
        );

        let id = inner.take_for_producer(&self.log);
        inner.producer = Some(id);

        ProducerFrame {
            buffer: self,
            id: Some(id),
            frame: RawFrame::new(),
        }
    }

    /// Producer: commits a filled frame to the consumer queue.
    pub fn commit_frame(&self, mut frame: ProducerFrame<'_>) {
        let id = frame.id.take().expect("frame committed twice");
        let mut inner = self.inner.lock().unwrap();

        debug_assert_eq!(inner.producer, Some(id));

        inner.slot_mut(id).frame = frame.frame;
        inner.push_tail(ListId::Queue, id);
        inner.producer = None;

        if inner.queue.len > inner.stats.max_queue_size {
            inner.stats.max_queue_size = inner.queue.len;
        }

        self.cond.notify_all();
    }

    /// Producer: aborts a frame, returning the slot to the free list.
    #[inline]
    pub fn abort_frame(&self, frame: ProducerFrame<'_>) {
        drop(frame);
    }

    fn abort_slot(&self, id: SlotId) {
        // runs from guard drops, also while unwinding: a poisoned lock
        // must not abort the process
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        debug_assert_eq!(inner.producer, Some(id));

        inner.push_head(ListId::Free, id);
        inner.producer = None;
    }

    /// Consumer: takes the oldest committed frame, waiting indefinitely.
    pub fn get_frame(&self) -> ConsumerFrame<'_> {
        let mut inner = self.inner.lock().unwrap();

        assert!(
            inner.consumer.is_none(),
            "a consumer frame is already in flight"
        );

        while inner.queue.len == 0 {
            inner = self.cond.wait(inner).unwrap();
        }

        self.take_for_consumer(inner)
    }

    /// Consumer: takes the oldest committed frame, or None on timeout.
    pub fn get_frame_timeout(&self, timeout: Duration) -> Option<ConsumerFrame<'_>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();

        assert!(
            inner.consumer.is_none(),
            "a consumer frame is already in flight"
        );

        while inner.queue.len == 0 {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (next, _) = self.cond.wait_timeout(inner, deadline - now).unwrap();
            inner = next;
        }

        Some(self.take_for_consumer(inner))
    }

    fn take_for_consumer(
        &self,
        mut inner: std::sync::MutexGuard<'_, BufferInner>,
    ) -> ConsumerFrame<'_> {
        let id = inner
            .pop_head(ListId::Queue)
            .expect("queue emptied while holding the lock");
        inner.consumer = Some(id);
        let frame = inner.slot(id).frame;

        ConsumerFrame {
            buffer: self,
            id: Some(id),
            frame,
        }
    }

    /// Consumer: returns a transmitted frame's slot to the free list.
    pub fn release_frame(&self, mut frame: ConsumerFrame<'_>) {
        let id = frame.id.take().expect("frame released twice");
        let mut inner = self.inner.lock().unwrap();

        debug_assert_eq!(inner.consumer, Some(id));

        inner.push_head(ListId::Free, id);
        inner.consumer = None;
    }

    /// Consumer: puts a frame back onto the queue head, so the next get
    /// returns it again. Used when transmission failed.
    pub fn put_frame(&self, mut frame: ConsumerFrame<'_>) {
        let id = frame.id.take().expect("frame already returned");
        self.put_slot(id);
    }

    fn put_slot(&self, id: SlotId) {
        // runs from guard drops, also while unwinding
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        debug_assert_eq!(inner.consumer, Some(id));

        inner.push_head(ListId::Queue, id);
        inner.consumer = None;
        self.cond.notify_all();
    }

    /// Discards all buffered but not yet consumed frames.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.concat(ListId::Free, ListId::Queue);
        inner.stats.flushes += 1;
    }

    /// Discards all buffered frames unless history is enabled.
    pub fn flush_unless_history(&self) {
        if !self.history {
            self.flush();
        }
    }

    /// Manually triggers a garbage collection.
    pub fn run_gc(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.gc(&self.log);
    }

    /// Garbage collector mainloop. Collects whenever the queue has drained
    /// below the configured fraction of the dynamic slot count.
    pub fn gc_mainloop(&self, shutdown: &crate::ctl::Shutdown) {
        let interval = Duration::from_secs(self.gc_interval);

        while shutdown.sleep(interval) {
            let mut inner = self.inner.lock().unwrap();
            if inner.queue.len < inner.dyn_count * inner.dynamic_backlog / self.gc_level {
                inner.gc(&self.log);
            }
        }
    }

    /// Statistics snapshot.
    pub fn statistics(&self) -> BufferStatistics {
        let inner = self.inner.lock().unwrap();
        let mut stats = inner.stats.clone();
        stats.queue_size = inner.queue.len;
        stats.pool_size = inner.free.len;
        stats.dyn_pools = inner.dyn_count;
        stats
    }
}

/// Frame in flight at the producer. Dropping it without a commit returns
/// the slot to the free list, also on early exits and panics.
pub struct ProducerFrame<'a> {
    buffer: &'a FrameBuffer,
    id: Option<SlotId>,
    /// Frame payload being filled
    pub frame: RawFrame,
}

impl<'a> Drop for ProducerFrame<'a> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.buffer.abort_slot(id);
        }
    }
}

/// Frame in flight at the consumer. Dropping it without a release puts the
/// slot back onto the queue head, so the frame is not lost on early exits.
pub struct ConsumerFrame<'a> {
    buffer: &'a FrameBuffer,
    id: Option<SlotId>,
    /// Committed frame payload
    pub frame: RawFrame,
}

impl<'a> Drop for ConsumerFrame<'a> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.buffer.put_slot(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use vane::logging;

    fn config(static_backlog: usize, history: bool) -> BufferConfig {
        BufferConfig {
            static_backlog,
            dynamic_backlog: 10,
            dynamic_increments: 1,
            history,
            gc: false,
            gc_interval: 120,
            gc_level: 2,
        }
    }

    fn buffer(static_backlog: usize, history: bool) -> FrameBuffer {
        FrameBuffer::new(&config(static_backlog, history), &logging::null())
    }

    fn commit_tagged(buf: &FrameBuffer, tag: u8) {
        let mut frame = buf.new_frame();
        frame.frame.raw[0] = tag;
        frame.frame.len = 1;
        buf.commit_frame(frame);
    }

    fn accounting_holds(buf: &FrameBuffer) -> bool {
        let inner = buf.inner.lock().unwrap();
        let in_flight = inner.producer.iter().count() + inner.consumer.iter().count();
        let collected: usize = inner
            .pools
            .iter()
            .filter_map(|pool| pool.as_ref().map(|pool| pool.collect.len))
            .sum();
        inner.queue.len + inner.free.len + collected + in_flight == inner.total_slots()
    }

    #[test]
    fn test_commit_get_release() {
        let buf = buffer(4, false);

        commit_tagged(&buf, 7);

        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.frame.raw[0], 7);
        buf.release_frame(frame);

        assert!(accounting_holds(&buf));
        assert_eq!(buf.statistics().queue_size, 0);
        assert_eq!(buf.statistics().pool_size, 4);
    }

    #[test]
    fn test_get_timeout_empty() {
        let buf = buffer(2, false);
        assert!(buf.get_frame_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_abort_returns_slot() {
        let buf = buffer(2, false);

        let frame = buf.new_frame();
        buf.abort_frame(frame);

        assert!(buf.get_frame_timeout(Duration::from_millis(5)).is_none());
        assert_eq!(buf.statistics().pool_size, 2);
        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_producer_drop_aborts() {
        let buf = buffer(2, false);

        {
            let _frame = buf.new_frame();
        }

        assert_eq!(buf.statistics().pool_size, 2);
        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_consumer_drop_requeues() {
        let buf = buffer(2, false);
        commit_tagged(&buf, 9);

        {
            let _frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        }

        let again = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(again.frame.raw[0], 9);
        buf.release_frame(again);
    }

    #[test]
    fn test_fifo_order() {
        let buf = buffer(4, false);

        for tag in 1..=3 {
            commit_tagged(&buf, tag);
        }

        for tag in 1..=3 {
            let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(frame.frame.raw[0], tag);
            buf.release_frame(frame);
        }
    }

    #[test]
    fn test_sacrifice_oldest() {
        let buf = buffer(2, false);

        for tag in 1..=3 {
            commit_tagged(&buf, tag);
        }

        // the first commit was sacrificed to make room for the third
        let stats = buf.statistics();
        assert_eq!(stats.discarded_all, 1);
        assert_eq!(stats.discarded_max, 1);
        assert_eq!(stats.queue_size, 2);

        for tag in 2..=3 {
            let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(frame.frame.raw[0], tag);
            buf.release_frame(frame);
        }

        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_discarded_cur_resets() {
        let buf = buffer(2, false);

        for tag in 1..=4 {
            commit_tagged(&buf, tag);
        }
        assert_eq!(buf.statistics().discarded_cur, 2);

        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        buf.release_frame(frame);

        commit_tagged(&buf, 5);
        assert_eq!(buf.statistics().discarded_cur, 0);
        assert_eq!(buf.statistics().discarded_max, 2);
    }

    #[test]
    fn test_put_frame_is_returned_first() {
        let buf = buffer(4, false);

        commit_tagged(&buf, 1);
        commit_tagged(&buf, 2);

        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.frame.raw[0], 1);
        buf.put_frame(frame);

        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.frame.raw[0], 1);
        buf.release_frame(frame);

        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.frame.raw[0], 2);
        buf.release_frame(frame);
    }

    #[test]
    fn test_dynamic_pool_growth() {
        let buf = buffer(2, true);

        // exhaust the static pool, then grow
        for tag in 1..=6 {
            commit_tagged(&buf, tag);
        }

        let stats = buf.statistics();
        assert_eq!(stats.discarded_all, 0);
        assert_eq!(stats.queue_size, 6);
        assert_eq!(stats.dyn_pools, 1);
        assert_eq!(stats.dyn_pools_all, 1);
        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_growth_cap_then_sacrifice() {
        let buf = buffer(2, true);

        // 2 static + 1 dynamic pool of 10 -> 12 slots
        for tag in 0..13 {
            commit_tagged(&buf, tag);
        }

        let stats = buf.statistics();
        assert_eq!(stats.dyn_pools, 1);
        assert_eq!(stats.discarded_all, 1);
        assert_eq!(stats.queue_size, 12);
    }

    #[test]
    fn test_gc_destroys_drained_pool() {
        let buf = buffer(2, true);

        for tag in 0..5 {
            commit_tagged(&buf, tag);
        }
        assert_eq!(buf.statistics().dyn_pools, 1);

        for _ in 0..5 {
            let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
            buf.release_frame(frame);
        }

        // every dynamic slot is unused, so a single run collects the pool
        // and frees it
        buf.run_gc();

        let stats = buf.statistics();
        assert_eq!(stats.dyn_pools, 0);
        assert_eq!(stats.gc_runs, 1);
        assert_eq!(stats.pool_size, 2);
        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_uncollect_instead_of_growth() {
        let buf = buffer(2, true);

        // the third commit forces a dynamic pool
        for tag in 0..3 {
            commit_tagged(&buf, tag);
        }
        assert_eq!(buf.statistics().dyn_pools, 1);

        // consume the two static slots, keep the dynamic one in flight
        // while the collector runs, so the pool is not fully collected
        for _ in 0..2 {
            let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
            buf.release_frame(frame);
        }
        let in_flight = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();

        buf.run_gc();
        assert_eq!(buf.statistics().dyn_pools, 1);

        buf.release_frame(in_flight);

        // three commits drain the free list, the fourth must uncollect
        // rather than deploy a second pool
        for tag in 10..14 {
            commit_tagged(&buf, tag);
        }

        let stats = buf.statistics();
        assert_eq!(stats.uncollected_pools, 1);
        assert_eq!(stats.dyn_pools, 1);
        assert_eq!(stats.dyn_pools_all, 1);
        assert_eq!(stats.discarded_all, 0);
        assert!(accounting_holds(&buf));
    }

    #[test]
    fn test_flush() {
        let buf = buffer(4, false);

        commit_tagged(&buf, 1);
        commit_tagged(&buf, 2);
        buf.flush();

        let stats = buf.statistics();
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.pool_size, 4);
        assert_eq!(stats.flushes, 1);
        assert!(buf.get_frame_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_flush_unless_history() {
        let buf = buffer(4, true);

        commit_tagged(&buf, 1);
        buf.flush_unless_history();

        assert_eq!(buf.statistics().queue_size, 1);
        assert_eq!(buf.statistics().flushes, 0);
    }

    #[test]
    fn test_put_frame_dropped_by_flush() {
        let buf = buffer(4, false);

        commit_tagged(&buf, 1);
        let frame = buf.get_frame_timeout(Duration::from_millis(10)).unwrap();
        buf.put_frame(frame);

        buf.flush_unless_history();
        assert!(buf.get_frame_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_max_queue_size() {
        let buf = buffer(8, false);

        for tag in 0..5 {
            commit_tagged(&buf, tag);
        }

        assert_eq!(buf.statistics().max_queue_size, 5);
    }

    #[test]
    fn test_blocking_get_wakes_on_commit() {
        let buf = Arc::new(buffer(2, false));

        let consumer = {
            let buf = buf.clone();
            thread::spawn(move || {
                let frame = buf.get_frame();
                let tag = frame.frame.raw[0];
                buf.release_frame(frame);
                tag
            })
        };

        thread::sleep(Duration::from_millis(20));
        commit_tagged(&buf, 42);

        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    #[should_panic(expected = "a producer frame is already in flight")]
    fn test_second_producer_frame_panics() {
        let buf = buffer(2, false);
        let _first = buf.new_frame();
        let _second = buf.new_frame();
    }
}
