//! # 文件句柄层
//!
//! 进程透过 [`File`] 读写普通文件：句柄自带读写游标（seek/tell），
//! 数据最终由 inode 层经块缓存搬运。
//! 同一 inode 的多个句柄游标互相独立。

use spin::Mutex;

use crate::inode::OpenInode;

pub struct File {
    inode: OpenInode,
    inner: Mutex<FileInner>,
}

struct FileInner {
    /// 下一次读写的字节偏移
    pos: usize,
    /// 本句柄是否在 inode 上挂了一票拒写
    deny_write: bool,
}

impl File {
    pub(crate) fn new(inode: OpenInode) -> Self {
        Self {
            inode,
            inner: Mutex::new(FileInner {
                pos: 0,
                deny_write: false,
            }),
        }
    }

    /// 从游标处读入 `buf`，游标前进实际读到的字节数。
    /// 读到文件末尾返回短计数（可能为 0）。
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let read = self.inode.read_at(inner.pos, buf);
        inner.pos += read;
        read
    }

    /// 把 `buf` 写到游标处，文件不够长会隐式扩展；
    /// inode 处于拒写状态时写入 0 字节
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let written = self.inode.write_at(inner.pos, buf);
        inner.pos += written;
        written
    }

    /// 游标挪到 `pos`，允许越过文件末尾（后续写入会扩展）
    pub fn seek(&self, pos: usize) {
        self.inner.lock().pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.inner.lock().pos
    }

    pub fn length(&self) -> usize {
        self.inode.length() as usize
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    /// 在 inode 上挂一票拒写；同一句柄重复调用不累加
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        if !inner.deny_write {
            inner.deny_write = true;
            self.inode.deny_write();
        }
    }

    /// 撤回本句柄挂的拒写票
    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        if inner.deny_write {
            inner.deny_write = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        // 关闭句柄时自动撤票，拒写不会泄漏到句柄之后
        if self.inner.lock().deny_write {
            self.inode.allow_write();
        }
    }
}
