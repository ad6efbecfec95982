//! # 文件系统门面层
//!
//! 系统调用层消费的入口：格式化/挂载整卷，
//! 以及以路径为参数的创建、打开、删除、建目录、换目录。
//! 相对路径基于调用者持有的 CWD 目录句柄解析，
//! CWD 本身存放在进程控制块里，不归本层管。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::block_cache::{BlockCache, BlockCacheManager};
use crate::dir::Dir;
use crate::file::File;
use crate::free_map::FreeMap;
use crate::inode;
use crate::inode::Inode;
use crate::layout::DiskInode;
use crate::path;
use crate::FsError;
use crate::FREE_MAP_SECTOR;
use crate::ROOT_DIR_SECTOR;
use crate::SECTOR_SIZE;

pub struct CacheFileSystem {
    block_device: Arc<dyn BlockDevice>,
    cache: BlockCacheManager,
    pub(crate) free_map: FreeMap,
    /// 打开 inode 表；锁只保护成员关系，不跨 I/O 持有
    pub(crate) open_inodes: Mutex<Vec<Arc<Inode>>>,
}

/// 打开一条路径的结果：普通文件或目录，二选一的带签变体
pub enum FileOrDir {
    File(File),
    Dir(Dir),
}

impl CacheFileSystem {
    /// 在块设备上铺一个空卷：0 号扇区放空闲位图文件的 inode，
    /// 1 号扇区放根目录（其 `..` 指向自己），其余归位图管。
    /// 结束时把缓存冲刷落盘，卷即刻可挂载。
    pub fn format(
        block_device: Arc<dyn BlockDevice>,
        total_sectors: u32,
    ) -> Result<Arc<Self>, FsError> {
        let free_map = FreeMap::new(total_sectors as usize);
        let bitmap_len = free_map.file_len();
        assert!(
            total_sectors as usize > 3 + bitmap_len.div_ceil(SECTOR_SIZE),
            "volume too small to hold its own metadata"
        );

        let fs = Arc::new(Self {
            block_device,
            cache: BlockCacheManager::new(),
            free_map,
            open_inodes: Mutex::new(Vec::new()),
        });
        fs.free_map.reserve(FREE_MAP_SECTOR);
        fs.free_map.reserve(ROOT_DIR_SECTOR);

        // 位图文件先于位图落盘存在，自举期间的分配只记在内存里
        inode::create(&fs, FREE_MAP_SECTOR, bitmap_len as u32, false)?;
        Dir::create(&fs, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)?;
        fs.free_map.write_back(&fs);

        fs.flush();
        log::info!("formatted volume: {total_sectors} sectors");
        Ok(fs)
    }

    /// 挂载已格式化的卷。0 号扇区 inode 的魔数即合法性校验，
    /// 失配视为卷损坏。
    pub fn load(block_device: Arc<dyn BlockDevice>) -> Arc<Self> {
        let fs = Arc::new(Self {
            block_device,
            cache: BlockCacheManager::new(),
            free_map: FreeMap::new(0),
            open_inodes: Mutex::new(Vec::new()),
        });

        let valid = fs
            .block(FREE_MAP_SECTOR)
            .lock()
            .map(0, DiskInode::is_valid);
        assert!(valid, "not a cache-fs volume");

        fs.free_map.restore(&fs);
        log::info!("mounted volume: {} sectors in use", fs.used_sectors());
        fs
    }

    /// 打开根目录；也用作进程初始 CWD
    pub fn root_dir(self: &Arc<Self>) -> Dir {
        Dir::new(inode::open(self, ROOT_DIR_SECTOR))
    }

    /// 建一个普通文件并预分配 `initial_size` 字节的清零数据。
    /// 最终成分已存在、中间成分缺失或不是目录、空间不足时失败。
    pub fn create(
        self: &Arc<Self>,
        cwd: &Dir,
        path: &str,
        initial_size: u32,
    ) -> Result<(), FsError> {
        let (parent, name) = path::resolve_parent(self, cwd, path)?;
        if parent.lookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let sector = self.free_map.allocate(self)?;
        if let Err(e) = inode::create(self, sector, initial_size, false) {
            self.free_map.release(self, sector);
            return Err(e);
        }
        if let Err(e) = parent.add(name, sector) {
            self.discard_orphan(sector);
            return Err(e);
        }
        Ok(())
    }

    /// 打开路径指向的文件或目录；`/` 给出根目录句柄
    pub fn open(self: &Arc<Self>, cwd: &Dir, path: &str) -> Result<FileOrDir, FsError> {
        let inode = path::resolve(self, cwd, path)?;
        Ok(if inode.is_dir() {
            FileOrDir::Dir(Dir::new(inode))
        } else {
            FileOrDir::File(File::new(inode))
        })
    }

    /// 删除文件或空目录。目录还有别的打开者（fd、CWD）时报
    /// [`FsError::Busy`]，还有 `.`、`..` 之外的目录项时报
    /// [`FsError::NotEmpty`]。数据的释放被推迟到最后一次关闭。
    pub fn remove(self: &Arc<Self>, cwd: &Dir, path: &str) -> Result<(), FsError> {
        let (parent, name) = path::resolve_parent(self, cwd, path)?;
        let sector = parent.lookup(name).ok_or(FsError::NotFound)?;

        {
            // 临时打开一下做可删性检查，离开作用域自动关闭
            let target = inode::open(self, sector);
            if target.is_dir() {
                if target.open_count() != 1 {
                    return Err(FsError::Busy);
                }
                let dir = Dir::new(target);
                if !dir.is_empty() {
                    return Err(FsError::NotEmpty);
                }
            }
        }

        parent.remove(name)
    }

    /// 建一个空目录（含 `.` 与 `..`）并挂到父目录下
    pub fn mkdir(self: &Arc<Self>, cwd: &Dir, path: &str) -> Result<(), FsError> {
        let (parent, name) = path::resolve_parent(self, cwd, path)?;
        if parent.lookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let sector = self.free_map.allocate(self)?;
        // Dir::create 失败时自己收拾，包括吐回扇区
        Dir::create(self, sector, parent.inumber())?;
        if let Err(e) = parent.add(name, sector) {
            self.discard_orphan(sector);
            return Err(e);
        }
        Ok(())
    }

    /// 解析出一个目录并返回它的新句柄，调用方以之替换自己的 CWD
    pub fn chdir(self: &Arc<Self>, cwd: &Dir, path: &str) -> Result<Dir, FsError> {
        let inode = path::resolve(self, cwd, path)?;
        if !inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok(Dir::new(inode))
    }

    /// 停机前的收尾：把缓存里的脏块全部写回设备
    pub fn flush(&self) {
        self.cache.flush();
    }

    /// 测试钩子：写回并失效整个缓存，统计清零
    pub fn cache_reset(&self) {
        self.cache.reset();
    }

    pub fn cache_hit_rate(&self) -> f32 {
        self.cache.hit_rate()
    }

    /// 缓存的 `(访问数, 命中数)`
    pub fn cache_stats(&self) -> (usize, usize) {
        self.cache.stats()
    }

    /// 底层设备累计写入的扇区数
    pub fn write_count(&self) -> usize {
        self.block_device.write_count()
    }

    /// 空闲位图中的占用位总数，用于观测扇区泄漏
    pub fn used_sectors(&self) -> usize {
        self.free_map.used()
    }

    /// 取指定扇区的缓存块；全部磁盘流量的必经之路
    pub(crate) fn block(&self, sector: u32) -> Arc<Mutex<BlockCache>> {
        self.cache.get(sector, &self.block_device)
    }

    /// 分配一个扇区并经缓存清零——索引槽里的非零指针
    /// 永远指向初始为全零的扇区
    pub(crate) fn alloc_zeroed(&self) -> Result<u32, FsError> {
        let sector = self.free_map.allocate(self)?;
        self.block(sector)
            .lock()
            .map_mut(0, |data: &mut crate::DataBlock| data.fill(0));
        Ok(sector)
    }

    /// 统一收拾没能挂进目录的 inode：打开、标记删除、
    /// 关闭即释放它的全部块和扇区
    fn discard_orphan(self: &Arc<Self>, sector: u32) {
        let orphan = inode::open(self, sector);
        orphan.mark_removed();
    }
}

impl FileOrDir {
    #[inline]
    pub fn is_dir(&self) -> bool {
        matches!(self, FileOrDir::Dir(_))
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            FileOrDir::File(file) => Some(file),
            FileOrDir::Dir(_) => None,
        }
    }

    pub fn into_dir(self) -> Option<Dir> {
        match self {
            FileOrDir::Dir(dir) => Some(dir),
            FileOrDir::File(_) => None,
        }
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        match self {
            FileOrDir::File(file) => file.inumber(),
            FileOrDir::Dir(dir) => dir.inumber(),
        }
    }
}
