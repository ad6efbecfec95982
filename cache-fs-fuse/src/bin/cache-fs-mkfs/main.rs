mod cli;

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use block_dev::BlockDevice;
use cache_fs::{CacheFileSystem, SECTOR_SIZE};
use cache_fs_fuse::BlockFile;
use clap::Parser;
use cli::Cli;
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let disk_size = cli.size.parse::<ByteSizeIec>().expect("invalid size").0;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(cli.out_dir.join("fs.img"))?;
    fd.set_len(disk_size)?;

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    let fs = CacheFileSystem::format(device, (disk_size as usize / SECTOR_SIZE) as u32)
        .expect("formatting failed");
    let root = fs.root_dir();

    if let Some(source) = &cli.source {
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().expect("file name isn't UTF-8");
            let data = std::fs::read(entry.path())?;

            fs.create(&root, name, 0)
                .unwrap_or_else(|e| panic!("creating {name:?} failed: {e:?}"));
            let Some(file) = fs.open(&root, name).unwrap().into_file() else {
                unreachable!()
            };
            assert_eq!(file.write(&data), data.len());
            log::info!("imported {name}: {} bytes", data.len());
        }
    }

    fs.flush();
    Ok(())
}
