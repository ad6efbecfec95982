//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此在内存中开辟定容缓冲区，
//! 把即将操作的扇区复制进来再操作。上层对磁盘的**所有**读写都经过
//! 这一层，inode 与目录代码不存在绕开缓存的设备流量。
//!
//! 写回策略：[`BlockCache::get_mut`] 只把缓存块标脏，真正落盘发生在
//! 块被驱逐、显式 [`flush`](BlockCacheManager::flush)（停机）或
//! [`reset`](BlockCacheManager::reset)（测试专用的失效）时，
//! 没有周期性的冲刷者。
//!
//! 并发语义：同一扇区至多被一个线程占用，占用即持有该块的互斥锁；
//! 其余线程在锁上等待。持锁的块（`Arc` 强计数大于一）不会被驱逐，
//! 其镜像的扇区号保持稳定。

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::mem;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::SECTOR_SIZE;

/// 内存中的扇区镜像
// repr(C) 保证 data 位于结构开头，按结构对齐供 get::<T> 转型
#[repr(C)]
pub struct BlockCache {
    /// 缓存的数据
    data: [u8; SECTOR_SIZE],
    /// 镜像的扇区号
    sector: u32,
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCache {
    fn new(sector: u32, device: Arc<dyn BlockDevice>) -> Self {
        let mut data = [0; SECTOR_SIZE];
        device.read_block(sector as usize, &mut data);

        Self {
            data,
            sector,
            device,
            modified: false,
        }
    }

    /// 脏块写回设备，干净块是空操作
    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.device.write_block(self.sector as usize, &self.data);
        }
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        let addr = self.offset(offset).cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        self.modified = true;
        let addr = self.offset(offset).cast_mut().cast();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    fn offset(&self, count: usize) -> *const u8 {
        &self.data[count]
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}

/// 块缓存管理器：定容表、LRU 驱逐与命中统计
pub struct BlockCacheManager {
    inner: Mutex<ManagerInner>,
}

struct ManagerInner {
    /// 队尾为最近使用的块
    queue: VecDeque<(u32, Arc<Mutex<BlockCache>>)>,
    accesses: usize,
    hits: usize,
}

impl BlockCacheManager {
    /// 块缓存个数的上限
    pub const CAPACITY: usize = 64;

    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                queue: VecDeque::with_capacity(Self::CAPACITY),
                accesses: 0,
                hits: 0,
            }),
        }
    }

    /// 取指定扇区的缓存块，未命中时读入，必要时先驱逐。
    ///
    /// 统计计数与表结构同受一把锁保护；未命中时读入设备的 I/O
    /// 也在锁内完成，于是未命中的设备流量是串行的。
    pub(crate) fn get(&self, sector: u32, device: &Arc<dyn BlockDevice>) -> Arc<Mutex<BlockCache>> {
        let mut inner = self.inner.lock();
        inner.accesses += 1;

        // 尝试从缓冲区中读取块，命中则挪到队尾
        if let Some(index) = inner.queue.iter().position(|(s, _)| *s == sector) {
            inner.hits += 1;
            let entry = inner.queue.remove(index).unwrap();
            let cache = entry.1.clone();
            inner.queue.push_back(entry);
            return cache;
        }

        // 触及上限，从最久未使用端驱逐一个无人占用的块；
        // Drop 会把脏块写回
        if inner.queue.len() == Self::CAPACITY {
            let victim = inner
                .queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1)
                .expect("run out of block cache");
            inner.queue.remove(victim);
        }

        let cache = Arc::new(Mutex::new(BlockCache::new(sector, device.clone())));
        inner.queue.push_back((sector, cache.clone()));
        cache
    }

    /// 把所有脏块写回设备，缓存内容保留
    pub(crate) fn flush(&self) {
        let inner = self.inner.lock();
        for (_, cache) in &inner.queue {
            cache.lock().sync();
        }
    }

    /// 写回并失效全部缓存块，统计清零。
    /// 只为让命中率测试可复现而存在，不是生产操作。
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.accesses = 0;
        inner.hits = 0;
    }

    pub(crate) fn hit_rate(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.accesses == 0 {
            0.0
        } else {
            inner.hits as f32 / inner.accesses as f32
        }
    }

    /// `(访问数, 命中数)`
    pub(crate) fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.accesses, inner.hits)
    }
}
