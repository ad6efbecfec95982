//! # 内存索引节点层
//!
//! 每个被打开的磁盘扇区至多对应一个 [`Inode`]，全部登记在
//! 文件系统的打开 inode 表里；重复打开同一扇区得到同一个对象，
//! 引用计数 `open_count` 记录在途的打开数（fd、CWD 都算）。
//!
//! [`Inode`] 不缓存 on-disk inode 的内容，每次字段访问都经过
//! 块缓存，磁盘上的 `length` 就是文件长度的唯一权威。
//!
//! 删除是延迟的：`remove` 只把句柄标成 `removed`，
//! 最后一个打开者离开时才释放整个块索引和 inode 扇区。

use alloc::sync::Arc;
use core::ops::Deref;

use spin::Mutex;

use crate::fs::CacheFileSystem;
use crate::layout::DiskInode;
use crate::layout::MAX_FILE_SIZE;
use crate::DataBlock;
use crate::FsError;
use crate::SECTOR_SIZE;

/// 一个磁盘 inode 的内存代表，身份就是它的扇区号
pub struct Inode {
    sector: u32,
    fs: Arc<CacheFileSystem>,
    inner: Mutex<InodeInner>,
}

/// inode 锁保护的计数器；决不跨数据拷贝持有
struct InodeInner {
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

/// 一次打开的凭据。克隆打开用 [`reopen`](Self::reopen)；
/// 丢弃即关闭，最后一个关闭者顺带执行延迟删除。
pub struct OpenInode {
    inode: Arc<Inode>,
}

/// 打开指定扇区上的 inode：表里已有就共享，没有就登记新句柄
pub(crate) fn open(fs: &Arc<CacheFileSystem>, sector: u32) -> OpenInode {
    let mut table = fs.open_inodes.lock();

    if let Some(inode) = table.iter().find(|inode| inode.sector == sector) {
        inode.inner.lock().open_count += 1;
        return OpenInode {
            inode: inode.clone(),
        };
    }

    let inode = Arc::new(Inode {
        sector,
        fs: fs.clone(),
        inner: Mutex::new(InodeInner {
            open_count: 1,
            removed: false,
            deny_write_count: 0,
        }),
    });
    table.push(inode.clone());
    drop(table);

    // 首次打开校验魔数；失配说明卷已损坏，终止而不是吞掉
    assert!(
        inode.on_disk(DiskInode::is_valid),
        "inode magic mismatch at sector {sector}"
    );

    OpenInode { inode }
}

/// 在指定扇区落一个新 inode，并按 `size` 预分配清零的数据块。
/// 分配失败时把已到手的块吐回去再报错；扇区本身由调用方释放。
pub(crate) fn create(
    fs: &CacheFileSystem,
    sector: u32,
    size: u32,
    is_dir: bool,
) -> Result<(), FsError> {
    let mut disk = DiskInode::new(is_dir);

    if let Err(e) = disk.resize(fs, size) {
        disk.resize(fs, 0)
            .expect("shrinking a failed creation to zero cannot fail");
        return Err(e);
    }

    fs.block(sector)
        .lock()
        .map_mut(0, |di: &mut DiskInode| *di = disk);
    Ok(())
}

impl Inode {
    /// inode 的编号，即其所在扇区
    #[inline]
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    #[inline]
    pub(crate) fn fs(&self) -> &Arc<CacheFileSystem> {
        &self.fs
    }

    pub fn length(&self) -> u32 {
        self.on_disk(|di| di.length)
    }

    pub fn is_dir(&self) -> bool {
        self.on_disk(DiskInode::is_dir)
    }

    /// 当前在途的打开数
    pub fn open_count(&self) -> u32 {
        self.inner.lock().open_count
    }

    /// 从 `offset` 起读出至多 `buf.len()` 字节，返回实际读到的字节数。
    /// 越过文件末尾的部分被截掉，完全越界读到 0 字节，这不是错误。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let end = (offset + buf.len()).min(self.length() as usize);
        if offset >= end {
            return 0;
        }

        let mut start = offset;
        let mut read_size = 0;
        loop {
            let block_index = start / SECTOR_SIZE;
            let block_end = ((block_index + 1) * SECTOR_SIZE).min(end);
            let len = block_end - start;

            let sector = self.sector_at(block_index as u32);
            self.fs.block(sector).lock().map(0, |data: &DataBlock| {
                // 绝对地址 % 扇区大小 = 扇区内偏移
                let src = &data[start % SECTOR_SIZE..start % SECTOR_SIZE + len];
                buf[read_size..read_size + len].copy_from_slice(src);
            });

            read_size += len;
            if block_end == end {
                break;
            }
            start = block_end;
        }

        read_size
    }

    /// 从 `offset` 起写入 `buf`，文件不够长就先隐式扩展。
    /// 返回写入的字节数；写被拒绝或扩展失败时返回 0，别无副作用。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let end = offset + buf.len();
        if end > MAX_FILE_SIZE {
            return 0;
        }

        {
            let inner = self.inner.lock();
            if inner.deny_write_count > 0 {
                return 0;
            }

            // 扩展在 inode 锁内完成，并发扩展者在此串行化；
            // 锁在数据拷贝前释放，不挡住其余读写者
            let mut disk = self.on_disk(DiskInode::clone);
            let old = disk.length;
            if end > old as usize {
                if disk.resize(&self.fs, end as u32).is_err() {
                    // 尽力回滚：以原长度重走一遍 resize，
                    // 释放失败的扩展已经登记的块
                    disk.resize(&self.fs, old)
                        .expect("shrinking back to the old length cannot fail");
                    log::warn!("extending to {end} bytes failed: no space");
                    return 0;
                }
                self.on_disk_mut(|di| *di = disk);
            }
            drop(inner);
        }

        if buf.is_empty() {
            return 0;
        }

        let mut start = offset;
        let mut written_size = 0;
        loop {
            let block_index = start / SECTOR_SIZE;
            let block_end = ((block_index + 1) * SECTOR_SIZE).min(end);
            let len = block_end - start;

            let sector = self.sector_at(block_index as u32);
            self.fs
                .block(sector)
                .lock()
                .map_mut(0, |data: &mut DataBlock| {
                    let dest = &mut data[start % SECTOR_SIZE..start % SECTOR_SIZE + len];
                    dest.copy_from_slice(&buf[written_size..written_size + len]);
                });

            written_size += len;
            if block_end == end {
                break;
            }
            start = block_end;
        }

        written_size
    }

    /// 禁止写入，用于保护在用的可执行文件。
    /// 每个打开者至多叫一次。
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        inner.deny_write_count += 1;
        assert!(inner.deny_write_count <= inner.open_count);
    }

    /// 恢复写入，与 [`deny_write`](Self::deny_write) 一一配对
    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.deny_write_count > 0);
        assert!(inner.deny_write_count <= inner.open_count);
        inner.deny_write_count -= 1;
    }

    /// 标记延迟删除；真正的释放发生在最后一次关闭
    pub(crate) fn mark_removed(&self) {
        self.inner.lock().removed = true;
    }

    /// 读取 on-disk inode 并处理
    fn on_disk<V>(&self, f: impl FnOnce(&DiskInode) -> V) -> V {
        self.fs.block(self.sector).lock().map(0, f)
    }

    /// 以某种方式修改 on-disk inode
    fn on_disk_mut<V>(&self, f: impl FnOnce(&mut DiskInode) -> V) -> V {
        self.fs.block(self.sector).lock().map_mut(0, f)
    }

    /// 文件第 `index` 个数据块所在的扇区
    fn sector_at(&self, index: u32) -> u32 {
        DiskInode::locate(&self.fs, self.sector, index)
    }
}

impl OpenInode {
    /// 追加一次打开，和原句柄共享同一个 [`Inode`]
    pub fn reopen(&self) -> OpenInode {
        self.inode.inner.lock().open_count += 1;
        OpenInode {
            inode: self.inode.clone(),
        }
    }
}

impl Deref for OpenInode {
    type Target = Inode;

    #[inline]
    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl Drop for OpenInode {
    fn drop(&mut self) {
        let fs = self.inode.fs.clone();

        // 先锁表再锁计数，与 open 的加锁次序一致；
        // 计数归零的句柄在放开表锁之前就被摘除，别人查不到它
        let mut table = fs.open_inodes.lock();
        let mut inner = self.inode.inner.lock();
        inner.open_count -= 1;
        if inner.open_count > 0 {
            return;
        }
        let removed = inner.removed;
        drop(inner);
        table.retain(|inode| !Arc::ptr_eq(inode, &self.inode));
        drop(table);

        if removed {
            let mut disk = self.inode.on_disk(DiskInode::clone);
            disk.resize(&fs, 0)
                .expect("shrinking to zero cannot fail");
            fs.free_map.release(&fs, self.inode.sector);
        }
    }
}
