//! # 磁盘数据结构层
//!
//! cache-fs 的磁盘布局：
//! 空闲位图文件 inode(0 号扇区) | 根目录 inode(1 号扇区) | 动态分配的其余扇区
//!
//! 没有超级块；两个保留扇区的位置就是全部的"格式约定"。

mod inode;
pub use inode::{DiskInode, MAX_FILE_SIZE};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DirEntry, NAME_MAX};
