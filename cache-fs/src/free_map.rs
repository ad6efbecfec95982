//! # 空闲扇区位图层
//!
//! 一位对应一个扇区：0 空闲，1 占用。分配策略是首次适应扫描。
//!
//! 位图本身以文件形式持久化，inode 固定在
//! [`FREE_MAP_SECTOR`]，数据块在格式化时一次性分配好，
//! 之后尺寸不再变化。每次置位/清位都同步把所在的窗口写穿到
//! 块缓存——和其它文件的写入走同一条路，落盘时机由缓存决定。
//!
//! 格式化期间位图文件还不存在，此时的分配只改内存；
//! [`write_back`](FreeMap::write_back) 全量落盘之后才进入写穿模式。

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::fs::CacheFileSystem;
use crate::layout::DiskInode;
use crate::DataBlock;
use crate::FsError;
use crate::FREE_MAP_SECTOR;
use crate::SECTOR_SIZE;

/// 一个位图窗口（扇区）能装下的 bit 组数量
const GROUPS_PER_SECTOR: usize = SECTOR_SIZE / 8;

pub(crate) struct FreeMap {
    inner: Mutex<FreeMapInner>,
}

struct FreeMapInner {
    /// 64 位一组的位图
    groups: Vec<u64>,
    /// 位图文件是否已经在盘上，决定变更是否写穿
    attached: bool,
}

impl FreeMap {
    /// 管理 `total_sectors` 个扇区的空位图，尾部多余的 bit 永久置 1
    pub(crate) fn new(total_sectors: usize) -> Self {
        let mut groups = vec![0u64; total_sectors.div_ceil(64)];
        for bit in total_sectors..groups.len() * 64 {
            groups[bit / 64] |= 1 << (bit % 64);
        }

        Self {
            inner: Mutex::new(FreeMapInner {
                groups,
                attached: false,
            }),
        }
    }

    /// 位图文件的字节长度
    pub(crate) fn file_len(&self) -> usize {
        self.inner.lock().groups.len() * 8
    }

    /// 格式化自举：直接占住保留扇区，不经过分配扫描
    pub(crate) fn reserve(&self, sector: u32) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.attached);
        let bit = sector as usize;
        inner.groups[bit / 64] |= 1 << (bit % 64);
    }

    /// 首次适应扫描出一个空闲扇区并占住它
    pub(crate) fn allocate(&self, fs: &CacheFileSystem) -> Result<u32, FsError> {
        let mut inner = self.inner.lock();

        let Some((group_index, ingroup_index)) =
            inner
                .groups
                .iter()
                .enumerate()
                .find_map(|(group_index, &bits)| {
                    (bits != u64::MAX).then_some((group_index, bits.trailing_ones() as usize))
                })
        else {
            return Err(FsError::NoSpace);
        };

        inner.groups[group_index] |= 1 << ingroup_index;
        inner.write_through(fs, group_index);

        Ok((group_index * 64 + ingroup_index) as u32)
    }

    /// 归还一个扇区。编号一定得有对应的占用位。
    pub(crate) fn release(&self, fs: &CacheFileSystem, sector: u32) {
        let mut inner = self.inner.lock();
        let (group_index, ingroup_index) = (sector as usize / 64, sector as usize % 64);

        assert_ne!(
            inner.groups[group_index] & (1 << ingroup_index),
            0,
            "releasing a free sector {sector}"
        );

        inner.groups[group_index] &= !(1 << ingroup_index);
        inner.write_through(fs, group_index);
    }

    /// 占用位总数，含尾部的填充位；用于观测泄漏
    pub(crate) fn used(&self) -> usize {
        self.inner
            .lock()
            .groups
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum()
    }

    /// 全量写回位图文件并进入写穿模式（格式化的收尾）
    pub(crate) fn write_back(&self, fs: &CacheFileSystem) {
        let mut inner = self.inner.lock();
        for window in 0..inner.groups.len().div_ceil(GROUPS_PER_SECTOR) {
            inner.write_window(fs, window);
        }
        inner.attached = true;
    }

    /// 挂载时从位图文件恢复内存位图
    pub(crate) fn restore(&self, fs: &CacheFileSystem) {
        let length = fs
            .block(FREE_MAP_SECTOR)
            .lock()
            .map(0, |di: &DiskInode| di.length) as usize;
        assert_eq!(length % 8, 0, "free map file length corrupted");

        let mut inner = self.inner.lock();
        inner.groups = vec![0u64; length / 8];

        for window in 0..(length / 8).div_ceil(GROUPS_PER_SECTOR) {
            let sector = DiskInode::locate(fs, FREE_MAP_SECTOR, window as u32);
            fs.block(sector).lock().map(0, |data: &DataBlock| {
                let base = window * GROUPS_PER_SECTOR;
                let count = GROUPS_PER_SECTOR.min(length / 8 - base);
                for (i, chunk) in data.chunks_exact(8).take(count).enumerate() {
                    inner.groups[base + i] = u64::from_le_bytes(chunk.try_into().unwrap());
                }
            });
        }
        inner.attached = true;
    }
}

impl FreeMapInner {
    /// 把一个 bit 组所在的窗口写穿到位图文件
    fn write_through(&mut self, fs: &CacheFileSystem, group_index: usize) {
        if self.attached {
            self.write_window(fs, group_index / GROUPS_PER_SECTOR);
        }
    }

    fn write_window(&mut self, fs: &CacheFileSystem, window: usize) {
        let sector = DiskInode::locate(fs, FREE_MAP_SECTOR, window as u32);
        let base = window * GROUPS_PER_SECTOR;
        let count = GROUPS_PER_SECTOR.min(self.groups.len() - base);

        fs.block(sector)
            .lock()
            .map_mut(0, |data: &mut DataBlock| {
                for (chunk, &bits) in data
                    .chunks_exact_mut(8)
                    .zip(self.groups[base..base + count].iter())
                {
                    chunk.copy_from_slice(&bits.to_le_bytes());
                }
            });
    }
}
