use flatfs::{Flatfs, ImageFileBuilder};

pub fn main() -> Result<(), flatfs::FsError> {
    let tmp = tempfile::tempfile()?;
    let dev = ImageFileBuilder::from(tmp).with_block_count(10240).build()?;

    // Mounting a blank image formats it.
    let fs = Flatfs::mount(dev)?;
    fs.mkdir("/DOCS")?;
    fs.create("/DOCS/readme.txt")?;
    fs.write("/DOCS/readme.txt", b"hello from a flat image\n", 0)?;

    for dir in fs.readdir("/")? {
        for file in fs.readdir(&format!("/{}", dir))? {
            let path = format!("/{}/{}", dir, file);
            let attrs = fs.getattr(&path)?;
            let mut buf = vec![0; attrs.size as usize];
            fs.read(&path, &mut buf, 0)?;
            print!("{} ({} bytes): {}", path, attrs.size, String::from_utf8_lossy(&buf));
        }
    }
    Ok(())
}
