//! 宿主机侧的块设备驱动：拿普通文件或一段内存当磁盘，
//! 让 cache-fs 可以在用户态被格式化、打包和测试。

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use block_dev::BlockDevice;
use cache_fs::SECTOR_SIZE;

/// 以宿主机文件为介质的块设备
pub struct BlockFile {
    file: Mutex<File>,
    writes: AtomicUsize,
}

impl BlockFile {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
            writes: AtomicUsize::new(0),
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(file.read(buf).unwrap(), SECTOR_SIZE, "not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete block!"
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

/// 以一段内存为介质的块设备，测试用
pub struct MemDisk {
    data: Mutex<Vec<u8>>,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(total_sectors: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; total_sectors * SECTOR_SIZE]),
            writes: AtomicUsize::new(0),
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.data.lock().unwrap();
        let start = block_id * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.data.lock().unwrap();
        let start = block_id * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}
