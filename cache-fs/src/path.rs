//! # 路径解析层
//!
//! 以 `/` 开头的路径从根目录出发，其余从调用者的 CWD 出发；
//! 按 `/` 切分成分并忽略空成分，于是 `a//b` 等于 `a/b`，
//! 结尾的 `/` 被忽略——唯一的例外是字面量 `/` 指根目录本身。
//!
//! `.` 与 `..` 不做特殊处理：它们是目录里真实存在的目录项，
//! 沿途查表自然就把它们走对了。行走过程中的每一步打开
//! 都在句柄离开作用域时关闭，`..` 的环不会在打开表里积累引用。

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::dir::Dir;
use crate::fs::CacheFileSystem;
use crate::inode;
use crate::inode::OpenInode;
use crate::layout::NAME_MAX;
use crate::FsError;
use crate::ROOT_DIR_SECTOR;

/// 拆掉最后一个成分，把前缀走到头：返回 `(父目录, 最终名字)`。
/// 对 `/`、空串这类没有最终成分的路径报 [`FsError::InvalidPath`]。
pub(crate) fn resolve_parent<'p>(
    fs: &Arc<CacheFileSystem>,
    cwd: &Dir,
    path: &'p str,
) -> Result<(Dir, &'p str), FsError> {
    let mut components: Vec<&str> = components(path).collect();
    let name = components.pop().ok_or(FsError::InvalidPath)?;
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }

    let parent = walk(fs, start_dir(fs, cwd, path), components)?;
    Ok((parent, name))
}

/// 把整条路径走到头，返回终点的 inode
pub(crate) fn resolve(
    fs: &Arc<CacheFileSystem>,
    cwd: &Dir,
    path: &str,
) -> Result<OpenInode, FsError> {
    if components(path).next().is_none() {
        // 没有任何成分：`/` 指根目录，空串不合法
        return if path.starts_with('/') {
            Ok(inode::open(fs, ROOT_DIR_SECTOR))
        } else {
            Err(FsError::InvalidPath)
        };
    }

    let (parent, name) = resolve_parent(fs, cwd, path)?;
    let sector = parent.lookup(name).ok_or(FsError::NotFound)?;
    Ok(inode::open(fs, sector))
}

#[inline]
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

fn start_dir(fs: &Arc<CacheFileSystem>, cwd: &Dir, path: &str) -> Dir {
    if path.starts_with('/') {
        fs.root_dir()
    } else {
        cwd.reopen()
    }
}

/// 逐成分下行；途中的每一站都必须是目录
fn walk<'p>(
    fs: &Arc<CacheFileSystem>,
    start: Dir,
    components: impl IntoIterator<Item = &'p str>,
) -> Result<Dir, FsError> {
    let mut dir = start;
    for component in components {
        if component.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let sector = dir.lookup(component).ok_or(FsError::NotFound)?;
        let inode = inode::open(fs, sector);
        if !inode.is_dir() {
            log::error!("middle segment {component:?} isn't a directory");
            return Err(FsError::NotDirectory);
        }
        dir = Dir::new(inode);
    }
    Ok(dir)
}
