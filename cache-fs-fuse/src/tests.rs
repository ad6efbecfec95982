//! 行为测试：每个用例在一块全新的内存盘上格式化出独立的卷。

use std::sync::Arc;

use cache_fs::{CacheFileSystem, Dir, File, FsError, ROOT_DIR_SECTOR};

use crate::MemDisk;

/// 16 MiB 的测试卷
const TOTAL_SECTORS: usize = 32768;

fn fresh() -> Arc<CacheFileSystem> {
    CacheFileSystem::format(Arc::new(MemDisk::new(TOTAL_SECTORS)), TOTAL_SECTORS as u32).unwrap()
}

fn open_file(fs: &Arc<CacheFileSystem>, cwd: &Dir, path: &str) -> File {
    fs.open(cwd, path)
        .unwrap_or_else(|e| panic!("opening {path:?} failed: {e:?}"))
        .into_file()
        .expect("expected a regular file")
}

#[test]
fn seek_normal() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "test.txt", 12).unwrap();
    let file = open_file(&fs, &root, "test.txt");
    assert_eq!(file.write(b"hello world\0"), 12);

    file.seek(6);
    assert_eq!(file.tell(), 6);
    let mut buf = [0u8; 6];
    assert_eq!(file.read(&mut buf), 6);
    assert_eq!(&buf, b"world\0");
}

#[test]
fn remove_while_open() {
    let fs = fresh();
    let root = fs.root_dir();
    let baseline = fs.used_sectors();

    fs.create(&root, "test.txt", 100).unwrap();
    let file = open_file(&fs, &root, "test.txt");

    // 删除只是摘目录项，打开着的句柄继续可用
    fs.remove(&root, "test.txt").unwrap();
    assert_eq!(file.write(b"hello\0"), 6);
    file.seek(0);
    let mut buf = [0u8; 6];
    assert_eq!(file.read(&mut buf), 6);
    assert_eq!(&buf, b"hello\0");

    // 最后一次关闭才真正释放
    drop(file);
    assert_eq!(fs.open(&root, "test.txt").err(), Some(FsError::NotFound));
    assert_eq!(fs.used_sectors(), baseline);
}

#[test]
fn write_coalescing() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "test", 0).unwrap();
    let file = open_file(&fs, &root, "test");
    let before = fs.write_count();

    // 64 KiB 逐字节写入，应合并成约 128 次数据扇区落盘
    const FILE_SIZE: usize = 65536;
    for i in 0..FILE_SIZE {
        assert_eq!(file.write(&[i as u8]), 1);
    }
    assert_eq!(file.length(), FILE_SIZE);

    // 冲掉剩余脏块后逐字节读回
    fs.cache_reset();
    file.seek(0);
    let mut byte = [0u8; 1];
    for i in 0..FILE_SIZE {
        assert_eq!(file.read(&mut byte), 1);
        assert_eq!(byte[0], i as u8);
    }

    let writes = fs.write_count() - before;
    assert!(writes <= 160, "{writes} device writes, expected on the order of 128");
}

#[test]
fn hit_rate_improves() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "test", 10240).unwrap();
    fs.cache_reset();

    let read_all = |file: &File| {
        let mut buf = [0u8; 256];
        let mut total = 0;
        loop {
            let read = file.read(&mut buf);
            if read == 0 {
                break;
            }
            total += read;
        }
        total
    };

    // 冷缓存顺序读一遍
    let file = open_file(&fs, &root, "test");
    assert_eq!(read_all(&file), 10240);
    let cold = fs.cache_hit_rate();
    drop(file);

    // 热缓存重读，命中率必须上升
    let file = open_file(&fs, &root, "test");
    assert_eq!(read_all(&file), 10240);
    let hot = fs.cache_hit_rate();
    assert!(cold < hot, "hit rate didn't improve: {cold} -> {hot}");

    let (accesses, hits) = fs.cache_stats();
    assert!(hits <= accesses);
}

#[test]
fn sparse_extension() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "f", 0).unwrap();
    let file = open_file(&fs, &root, "f");

    // 在 65000 处写入会先把 [0, 65000) 物化成零
    let data = [0xa5u8; 1024];
    file.seek(65_000);
    assert_eq!(file.write(&data), 1024);
    assert_eq!(file.length(), 66_024);

    file.seek(0);
    let mut hole = vec![0xffu8; 65_000];
    assert_eq!(file.read(&mut hole), 65_000);
    assert!(hole.iter().all(|&b| b == 0), "holes must read back as zeros");

    let mut tail = [0u8; 1024];
    assert_eq!(file.read(&mut tail), 1024);
    assert_eq!(tail, data);
}

#[test]
fn remove_nonempty_dir() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.mkdir(&root, "/a").unwrap();
    fs.create(&root, "/a/f", 0).unwrap();

    assert_eq!(fs.remove(&root, "/a"), Err(FsError::NotEmpty));
    fs.remove(&root, "/a/f").unwrap();
    fs.remove(&root, "/a").unwrap();
    assert_eq!(fs.open(&root, "/a").err(), Some(FsError::NotFound));
}

#[test]
fn write_read_roundtrip() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "blob", 0).unwrap();
    let file = open_file(&fs, &root, "blob");

    let data: Vec<u8> = (0..8000u32).map(|i| (i * 31 % 251) as u8).collect();
    assert_eq!(file.write(&data), data.len());

    file.seek(0);
    let mut readback = vec![0u8; data.len()];
    assert_eq!(file.read(&mut readback), data.len());
    assert_eq!(readback, data);
}

#[test]
fn mkdir_dots() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.mkdir(&root, "p").unwrap();
    let dir = fs.open(&root, "p").unwrap().into_dir().expect("a directory");

    // 新目录只有 `.` 与 `..`
    assert_eq!(dir.read_entry().as_deref(), Some("."));
    assert_eq!(dir.read_entry().as_deref(), Some(".."));
    assert_eq!(dir.read_entry(), None);

    let dot = fs.open(&root, "p/.").unwrap();
    assert!(dot.is_dir());
    assert_eq!(dot.inumber(), dir.inumber());

    let dotdot = fs.open(&root, "p/..").unwrap();
    assert_eq!(dotdot.inumber(), root.inumber());
}

#[test]
fn readdir_lists_created() {
    let fs = fresh();
    let root = fs.root_dir();

    let mut names = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for name in names {
        fs.create(&root, name, 0).unwrap();
    }

    let dir = fs.open(&root, "/").unwrap().into_dir().unwrap();
    let mut seen = Vec::new();
    while let Some(name) = dir.read_entry() {
        if name != "." && name != ".." {
            seen.push(name);
        }
    }

    names.sort();
    seen.sort();
    assert_eq!(seen, names);
}

#[test]
fn grow_shrink_restores_free_map() {
    let fs = fresh();
    let root = fs.root_dir();
    let baseline = fs.used_sectors();

    fs.create(&root, "big", 0).unwrap();
    {
        let file = open_file(&fs, &root, "big");
        // 800 个数据扇区，深入二级间接索引
        let data = vec![7u8; 400 * 1024];
        assert_eq!(file.write(&data), data.len());

        // 数据 800 + 一级间接 1 + 二级外层 1 + 二级内层 5 + inode 1
        assert_eq!(fs.used_sectors() - baseline, 808);

        file.seek(399 * 1024);
        let mut buf = [0u8; 1024];
        assert_eq!(file.read(&mut buf), 1024);
        assert!(buf.iter().all(|&b| b == 7));
    }

    fs.remove(&root, "big").unwrap();
    assert_eq!(fs.used_sectors(), baseline);
}

#[test]
fn path_edge_cases() {
    let fs = fresh();
    let root = fs.root_dir();

    assert_eq!(fs.create(&root, "", 0), Err(FsError::InvalidPath));
    assert_eq!(fs.create(&root, "/", 0), Err(FsError::InvalidPath));
    assert_eq!(fs.create(&root, "missing/x", 0), Err(FsError::NotFound));
    assert_eq!(fs.create(&root, "xxxxxxxxxxxxxxx", 0), Err(FsError::NameTooLong));

    fs.mkdir(&root, "a").unwrap();
    // 空成分被忽略：`a//b` 就是 `a/b`，结尾斜线同理
    fs.create(&root, "a//b", 0).unwrap();
    let file = fs.open(&root, "/a/b/").unwrap();
    assert!(!file.is_dir());

    // 中间成分是普通文件
    assert_eq!(fs.create(&root, "a/b/c", 0), Err(FsError::NotDirectory));

    assert_eq!(fs.mkdir(&root, "a"), Err(FsError::AlreadyExists));
    assert_eq!(fs.create(&root, "a/b", 0), Err(FsError::AlreadyExists));
    assert_eq!(fs.remove(&root, "a/zzz"), Err(FsError::NotFound));
}

#[test]
fn cwd_relative_walk() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.mkdir(&root, "a").unwrap();
    fs.mkdir(&root, "a/b").unwrap();
    let cwd = fs.chdir(&root, "a/b").unwrap();

    fs.create(&cwd, "y", 0).unwrap();
    assert!(fs.open(&root, "/a/b/y").is_ok());

    fs.create(&cwd, "../x", 0).unwrap();
    assert!(fs.open(&root, "/a/x").is_ok());

    let back = fs.chdir(&cwd, "..").unwrap();
    let a = fs.open(&root, "/a").unwrap();
    assert_eq!(back.inumber(), a.inumber());

    let top = fs.chdir(&cwd, "/").unwrap();
    assert_eq!(top.inumber(), root.inumber());

    assert_eq!(fs.chdir(&root, "a/x").err(), Some(FsError::NotDirectory));
}

#[test]
fn deny_write_blocks_writes() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "prog", 0).unwrap();
    let first = open_file(&fs, &root, "prog");
    assert_eq!(first.write(b"code"), 4);

    // 拒写挂在 inode 上，别的句柄同样被拒
    first.deny_write();
    assert_eq!(first.write(b"zzz"), 0);
    let second = open_file(&fs, &root, "prog");
    assert_eq!(second.write(b"zzz"), 0);

    first.allow_write();
    assert_eq!(second.write(b"ok"), 2);

    // 关闭句柄自动撤票
    second.deny_write();
    drop(second);
    assert_eq!(first.write(b"!"), 1);
}

#[test]
fn busy_directory_remove() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.mkdir(&root, "d").unwrap();
    let held = fs.open(&root, "d").unwrap().into_dir().unwrap();
    assert_eq!(fs.remove(&root, "d"), Err(FsError::Busy));
    drop(held);
    fs.remove(&root, "d").unwrap();

    // 被进程当成 CWD 的目录同样算打开者
    fs.mkdir(&root, "e").unwrap();
    let cwd = fs.chdir(&root, "e").unwrap();
    assert_eq!(fs.remove(&root, "e"), Err(FsError::Busy));
    drop(cwd);
    fs.remove(&root, "e").unwrap();
}

#[test]
fn open_root() {
    let fs = fresh();
    let root = fs.root_dir();

    let opened = fs.open(&root, "/").unwrap();
    assert!(opened.is_dir());
    assert_eq!(opened.inumber(), ROOT_DIR_SECTOR);
}

#[test]
fn initial_size_is_zero_filled() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "z", 1000).unwrap();
    let file = open_file(&fs, &root, "z");
    assert_eq!(file.length(), 1000);

    let mut buf = vec![1u8; 2000];
    // 越过末尾的部分截成短读
    assert_eq!(file.read(&mut buf), 1000);
    assert!(buf[..1000].iter().all(|&b| b == 0));
    // 完全越界读到 0 字节，不是错误
    assert_eq!(file.read(&mut buf), 0);
}

#[test]
fn handles_share_one_inode() {
    let fs = fresh();
    let root = fs.root_dir();

    fs.create(&root, "s", 0).unwrap();
    let writer = open_file(&fs, &root, "s");
    let reader = open_file(&fs, &root, "s");
    assert_eq!(writer.inumber(), reader.inumber());

    // 两个句柄指向同一个打开 inode，写入立即互相可见
    assert_eq!(writer.write(b"hello"), 5);
    let mut buf = [0u8; 5];
    assert_eq!(reader.read(&mut buf), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn mount_roundtrip() {
    let device = Arc::new(MemDisk::new(TOTAL_SECTORS));
    let used;
    {
        let fs = CacheFileSystem::format(device.clone(), TOTAL_SECTORS as u32).unwrap();
        let root = fs.root_dir();
        fs.create(&root, "persist", 0).unwrap();
        assert_eq!(open_file(&fs, &root, "persist").write(b"durable"), 7);
        fs.mkdir(&root, "sub").unwrap();
        fs.create(&root, "sub/inner", 0).unwrap();
        assert_eq!(open_file(&fs, &root, "sub/inner").write(b"deep"), 4);
        used = fs.used_sectors();
        fs.flush();
    }

    let fs = CacheFileSystem::load(device);
    assert_eq!(fs.used_sectors(), used);

    let root = fs.root_dir();
    let file = open_file(&fs, &root, "persist");
    let mut buf = [0u8; 7];
    assert_eq!(file.read(&mut buf), 7);
    assert_eq!(&buf, b"durable");

    let file = open_file(&fs, &root, "sub/inner");
    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut buf), 4);
    assert_eq!(&buf, b"deep");
}
