//! # 目录层
//!
//! 目录就是内容为 [`DirEntry`] 定长数组的普通文件，
//! 查找、新增、删除都是对这个文件的线性读写。
//! 新目录预留 16 个槽位，开头两项固定是 `.` 与 `..`。

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::fs::CacheFileSystem;
use crate::inode;
use crate::inode::OpenInode;
use crate::layout::DirEntry;
use crate::layout::NAME_MAX;
use crate::FsError;

/// 新目录文件预留的槽位数
const PREALLOC_ENTRIES: usize = 16;

/// 打开的目录句柄，自带 `readdir` 的遍历游标
pub struct Dir {
    inode: OpenInode,
    /// 下一个待检查的槽位下标
    pos: Mutex<usize>,
}

impl Dir {
    /// 把一个打开的 inode 当作目录使用
    pub(crate) fn new(inode: OpenInode) -> Self {
        assert!(inode.is_dir());
        Self {
            inode,
            pos: Mutex::new(0),
        }
    }

    /// 在指定扇区建一个空目录，`.` 指向自己，`..` 指向父目录；
    /// 根目录把父目录传成自己即可。
    /// 失败时把分到手的东西全部吐回去，包括 `sector` 本身。
    pub(crate) fn create(
        fs: &Arc<CacheFileSystem>,
        sector: u32,
        parent_sector: u32,
    ) -> Result<(), FsError> {
        if let Err(e) = inode::create(
            fs,
            sector,
            (PREALLOC_ENTRIES * DirEntry::SIZE) as u32,
            true,
        ) {
            fs.free_map.release(fs, sector);
            return Err(e);
        }

        let dir = Dir::new(inode::open(fs, sector));
        if let Err(e) = dir
            .add(".", sector)
            .and_then(|()| dir.add("..", parent_sector))
        {
            // 关闭时连同数据块、扇区一并释放
            dir.inode().mark_removed();
            return Err(e);
        }
        Ok(())
    }

    /// 对同一目录追加一次打开，游标互相独立
    pub fn reopen(&self) -> Dir {
        Dir::new(self.inode.reopen())
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    #[inline]
    pub(crate) fn inode(&self) -> &OpenInode {
        &self.inode
    }

    /// 按名字查出目录项指向的 inode 扇区
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.lookup_slot(name)
            .map(|(_, entry)| entry.inode_sector())
    }

    /// 新增目录项。名字为空、超长、重复都被拒绝；
    /// 优先复用空槽，没有空槽就扩展目录文件。
    pub fn add(&self, name: &str, sector: u32) -> Result<(), FsError> {
        if name.is_empty() {
            return Err(FsError::InvalidPath);
        }
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if self.lookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let slot = (0..self.entry_count())
            .find(|&slot| !self.entry_at(slot).in_use())
            .unwrap_or_else(|| self.entry_count());

        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(slot * DirEntry::SIZE, entry.as_bytes()) != DirEntry::SIZE {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// 摘除目录项并把它指向的 inode 标成延迟删除。
    /// 调用方负责目录可删性（空、无其它打开者）的检查。
    pub(crate) fn remove(&self, name: &str) -> Result<(), FsError> {
        if name == "." || name == ".." {
            // 摘掉这两项会破坏父子链
            return Err(FsError::InvalidPath);
        }

        let (slot, entry) = self.lookup_slot(name).ok_or(FsError::NotFound)?;

        let cleared = DirEntry::default();
        assert_eq!(
            self.inode
                .write_at(slot * DirEntry::SIZE, cleared.as_bytes()),
            DirEntry::SIZE
        );

        let target = inode::open(self.inode.fs(), entry.inode_sector());
        target.mark_removed();
        Ok(())
    }

    /// 取下一个在用目录项的名字，`.` 与 `..` 也会被依次给出；
    /// 目录遍历完返回 `None`
    pub fn read_entry(&self) -> Option<String> {
        let mut pos = self.pos.lock();
        while *pos < self.entry_count() {
            let entry = self.entry_at(*pos);
            *pos += 1;
            if entry.in_use() {
                return Some(entry.name().into());
            }
        }
        None
    }

    /// 除 `.` 与 `..` 外再无在用目录项
    pub(crate) fn is_empty(&self) -> bool {
        (0..self.entry_count()).all(|slot| {
            let entry = self.entry_at(slot);
            !entry.in_use() || entry.name() == "." || entry.name() == ".."
        })
    }

    fn entry_count(&self) -> usize {
        self.inode.length() as usize / DirEntry::SIZE
    }

    fn entry_at(&self, slot: usize) -> DirEntry {
        let mut entry = DirEntry::default();
        assert_eq!(
            self.inode
                .read_at(slot * DirEntry::SIZE, entry.as_bytes_mut()),
            DirEntry::SIZE
        );
        entry
    }

    fn lookup_slot(&self, name: &str) -> Option<(usize, DirEntry)> {
        (0..self.entry_count())
            .map(|slot| (slot, self.entry_at(slot)))
            .find(|(_, entry)| entry.in_use() && entry.name() == name)
    }
}
