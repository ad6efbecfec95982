//! on-disk inode 与三层块索引
//! - 直接索引：inode 内 123 个扇区号，每个指向一个数据块
//! - 一级间接：一个扇区连续存储 128 个扇区号，指向数据块
//! - 二级间接：一个扇区连续存储 128 个扇区号，指向一级间接块
//!
//! 索引槽里的 0 表示"未分配"；`length` 覆盖的偏移必须有非零槽，
//! 文件的"洞"在分配时就被清零物化，磁盘上不存在稀疏编码。

use core::mem;

use crate::fs::CacheFileSystem;
use crate::FsError;
use crate::INODE_MAGIC;
use crate::SECTOR_SIZE;

/// 间接索引块的编号容量
const INDIRECT_COUNT: usize = SECTOR_SIZE / mem::size_of::<u32>();
/// 间接索引块
type IndirectBlock = [u32; INDIRECT_COUNT];

/// inode 内直接索引槽的个数
const DIRECT_COUNT: usize = 123;
/// 只用直接索引时的编号容量（扇区）
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级间接索引时的编号容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;
/// 用上二级间接索引时的编号容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT_COUNT * INDIRECT_COUNT;

/// 单个文件的字节容量上限，约 8.06 MiB
pub const MAX_FILE_SIZE: usize = INDIRECT2_CAP * SECTOR_SIZE;

/// on-disk inode，恰好占一个扇区。
///
/// 内存里的打开句柄（[`crate::OpenInode`]）不缓存这份数据，
/// 每次字段访问都经过块缓存。
#[derive(Clone)]
#[repr(C)]
pub struct DiskInode {
    /// 文件数据的字节数，目录也算
    pub(crate) length: u32,
    is_dir: u32,
    direct: [u32; DIRECT_COUNT],
    indirect: u32,
    doubly_indirect: u32,
    magic: u32,
}

// 结构必须恰好一个扇区宽，否则布局约定被破坏
const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

impl DiskInode {
    pub(crate) fn new(is_dir: bool) -> Self {
        Self {
            length: 0,
            is_dir: is_dir as u32,
            direct: [0; DIRECT_COUNT],
            indirect: 0,
            doubly_indirect: 0,
            magic: INODE_MAGIC,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    /// 逻辑上 inode 指向一系列数据块，此处给出第 `index` 块
    /// 在设备上的扇区号。只能对 `length` 覆盖的索引调用。
    ///
    /// 关联函数而非方法：调用方不持有任何缓存块的锁，
    /// 每层索引各自经过一次块缓存，取完即放。
    pub(crate) fn locate(fs: &CacheFileSystem, inode_sector: u32, index: u32) -> u32 {
        let index = index as usize;

        let sector = if index < DIRECT_CAP {
            fs.block(inode_sector)
                .lock()
                .map(0, |di: &DiskInode| di.direct[index])
        } else if index < INDIRECT1_CAP {
            let indirect = fs
                .block(inode_sector)
                .lock()
                .map(0, |di: &DiskInode| di.indirect);
            assert_ne!(indirect, 0, "indirect block missing inside length");
            fs.block(indirect)
                .lock()
                // 剔去直接索引的部分
                .map(0, |blk: &IndirectBlock| blk[index - DIRECT_CAP])
        } else if index < INDIRECT2_CAP {
            // 剔去使用了一级索引的部分
            let index = index - INDIRECT1_CAP;

            let doubly = fs
                .block(inode_sector)
                .lock()
                .map(0, |di: &DiskInode| di.doubly_indirect);
            assert_ne!(doubly, 0, "doubly indirect block missing inside length");
            let indirect = fs
                .block(doubly)
                .lock()
                .map(0, |blk: &IndirectBlock| blk[index / INDIRECT_COUNT]);
            assert_ne!(indirect, 0, "indirect block missing inside length");
            fs.block(indirect)
                .lock()
                .map(0, |blk: &IndirectBlock| blk[index % INDIRECT_COUNT])
        } else {
            panic!("data block index {index} beyond the largest supported file");
        };

        assert_ne!(sector, 0, "hole inside length at data block {index}");
        sector
    }

    /// 调整文件到 `new_size` 字节：逐层走过三级索引，
    /// 落在保留范围内的空槽分配并清零，落在范围外的非零槽释放归还。
    /// 间接索引的承载块在首次需要时分配，孩子清空且尺寸降到
    /// 本层门槛之下时释放。只有完全成功才更新 `length`。
    ///
    /// 增长中途分配失败时，已写入索引的块保持可见地落在盘上，
    /// 调用方以原长度重新调用本函数即可释放它们；
    /// 缩小路径只做释放，不会失败。
    pub(crate) fn resize(&mut self, fs: &CacheFileSystem, new_size: u32) -> Result<(), FsError> {
        if new_size as usize > MAX_FILE_SIZE {
            return Err(FsError::NoSpace);
        }
        let size = new_size as usize;

        /******************** 直接索引 ********************/
        for i in 0..DIRECT_COUNT {
            let covered = size > i * SECTOR_SIZE;
            if !covered && self.direct[i] != 0 {
                fs.free_map.release(fs, self.direct[i]);
                self.direct[i] = 0;
            } else if covered && self.direct[i] == 0 {
                self.direct[i] = fs.alloc_zeroed()?;
            }
        }
        /******************** END ********************/

        /******************** 一级间接索引 ********************/
        if self.indirect == 0 && size <= DIRECT_CAP * SECTOR_SIZE {
            self.length = new_size;
            return Ok(());
        }

        let mut scratch: IndirectBlock = [0; INDIRECT_COUNT];
        if self.indirect == 0 {
            self.indirect = fs.alloc_zeroed()?;
        } else {
            fs.block(self.indirect)
                .lock()
                .map(0, |blk: &IndirectBlock| scratch = *blk);
        }

        let mut result = Ok(());
        for i in 0..INDIRECT_COUNT {
            let covered = size > (DIRECT_CAP + i) * SECTOR_SIZE;
            if !covered && scratch[i] != 0 {
                fs.free_map.release(fs, scratch[i]);
                scratch[i] = 0;
            } else if covered && scratch[i] == 0 {
                match fs.alloc_zeroed() {
                    Ok(sector) => scratch[i] = sector,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        // 失败也要把 scratch 写回，回滚才找得到刚分配的块
        fs.block(self.indirect)
            .lock()
            .map_mut(0, |blk: &mut IndirectBlock| *blk = scratch);
        result?;

        if size <= DIRECT_CAP * SECTOR_SIZE {
            fs.free_map.release(fs, self.indirect);
            self.indirect = 0;
        }
        /******************** END ********************/

        /******************** 二级间接索引 ********************/
        if self.doubly_indirect == 0 && size <= INDIRECT1_CAP * SECTOR_SIZE {
            self.length = new_size;
            return Ok(());
        }

        let mut outer: IndirectBlock = [0; INDIRECT_COUNT];
        if self.doubly_indirect == 0 {
            self.doubly_indirect = fs.alloc_zeroed()?;
        } else {
            fs.block(self.doubly_indirect)
                .lock()
                .map(0, |blk: &IndirectBlock| outer = *blk);
        }

        let mut result = Ok(());
        'tier: for i in 0..INDIRECT_COUNT {
            // 本槽指向的一级间接块所覆盖区间的起始扇区
            let base = INDIRECT1_CAP + i * INDIRECT_COUNT;
            if outer[i] == 0 && size <= base * SECTOR_SIZE {
                // 后面的槽也都用不上
                break;
            }

            let mut inner: IndirectBlock = [0; INDIRECT_COUNT];
            if outer[i] == 0 {
                match fs.alloc_zeroed() {
                    Ok(sector) => outer[i] = sector,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            } else {
                fs.block(outer[i])
                    .lock()
                    .map(0, |blk: &IndirectBlock| inner = *blk);
            }

            for j in 0..INDIRECT_COUNT {
                let covered = size > (base + j) * SECTOR_SIZE;
                if !covered && inner[j] != 0 {
                    fs.free_map.release(fs, inner[j]);
                    inner[j] = 0;
                } else if covered && inner[j] == 0 {
                    match fs.alloc_zeroed() {
                        Ok(sector) => inner[j] = sector,
                        Err(e) => {
                            fs.block(outer[i])
                                .lock()
                                .map_mut(0, |blk: &mut IndirectBlock| *blk = inner);
                            result = Err(e);
                            break 'tier;
                        }
                    }
                }
            }

            fs.block(outer[i])
                .lock()
                .map_mut(0, |blk: &mut IndirectBlock| *blk = inner);

            if size <= base * SECTOR_SIZE {
                fs.free_map.release(fs, outer[i]);
                outer[i] = 0;
            }
        }
        fs.block(self.doubly_indirect)
            .lock()
            .map_mut(0, |blk: &mut IndirectBlock| *blk = outer);
        result?;

        if size <= INDIRECT1_CAP * SECTOR_SIZE {
            fs.free_map.release(fs, self.doubly_indirect);
            self.doubly_indirect = 0;
        }
        /******************** END ********************/

        self.length = new_size;
        Ok(())
    }
}
