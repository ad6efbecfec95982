//! # cache-fs
//!
//! 一个带写回式缓冲区缓存、支持文件随写随长的层次文件系统。
//!
//! 磁盘布局没有超级块：0 号扇区固定存放空闲扇区位图文件的 inode，
//! 1 号扇区固定存放根目录的 inode，其余扇区全部由位图动态分配。
//! 每个 inode 恰好占一个扇区，通过直接、一级间接、二级间接三层索引
//! 指向数据块；目录就是内容为定长目录项数组的普通文件。

#![no_std]

extern crate alloc;

/* cache-fs 的整体架构，自上而下 */

// 文件系统门面层：格式化、挂载，以及对路径的创建/打开/删除等操作
mod fs;
pub use fs::{CacheFileSystem, FileOrDir};

// 文件与目录句柄层：进程可见的读写游标与目录遍历游标
mod dir;
mod file;
pub use dir::Dir;
pub use file::File;

// 路径解析层：把字节串拆成路径成分并沿目录树行走
mod path;

// 内存索引节点层：打开 inode 表、读写引擎、延迟删除
mod inode;
pub use inode::{Inode, OpenInode};

// 空闲扇区位图层：以 0 号扇区的文件形式持久化
mod free_map;

// 磁盘数据结构层：on-disk inode 与目录项
mod layout;
pub use layout::{DirEntry, DiskInode, MAX_FILE_SIZE, NAME_MAX};

// 块缓存层：所有磁盘流量的必经之路
mod block_cache;

mod error;
pub use error::FsError;

/// inode 魔数，用于挂载与打开时的合法性校验
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// 扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;
/// 空闲扇区位图文件的 inode 所在扇区
pub const FREE_MAP_SECTOR: u32 = 0;
/// 根目录的 inode 所在扇区
pub const ROOT_DIR_SECTOR: u32 = 1;

type DataBlock = [u8; SECTOR_SIZE];
