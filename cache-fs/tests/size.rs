use std::mem;

use cache_fs::{DirEntry, DiskInode, MAX_FILE_SIZE, SECTOR_SIZE};

#[test]
fn layout() {
    assert_eq!(SECTOR_SIZE, mem::size_of::<DiskInode>());
    assert_eq!(20, mem::size_of::<DirEntry>());
    assert_eq!(DirEntry::SIZE, mem::size_of::<DirEntry>());
    assert_eq!((123 + 128 + 128 * 128) * SECTOR_SIZE, MAX_FILE_SIZE);
}
