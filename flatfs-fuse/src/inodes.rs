use std::collections::HashMap;

use flatfs::BlockNumber;

pub const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;

/// Inode number of the entry identified by `block`. Block 0 is the root block,
/// which makes `/` inode 1 as the kernel expects.
pub fn ino_of(block: BlockNumber) -> u64 {
    block as u64 + 1
}

/// Maps inode numbers handed to the kernel back to engine paths. Entries are
/// added as the kernel learns about them and never removed, since blocks are
/// never reused.
pub struct InodeTable {
    paths: HashMap<u64, String>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        InodeTable { paths }
    }

    pub fn insert(&mut self, ino: u64, path: String) {
        self.paths.insert(ino, path);
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Path of `name` inside the entry `parent`, if `parent` is known.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        self.path(parent).map(|dir| join(dir, name))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preseeded() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some("/"));
        assert_eq!(ino_of(0), ROOT_INO);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn children_extend_their_parent() {
        let mut table = InodeTable::new();
        assert_eq!(table.child_path(ROOT_INO, "DOCS").unwrap(), "/DOCS");

        table.insert(ino_of(1), "/DOCS".to_string());
        assert_eq!(
            table.child_path(ino_of(1), "readme.txt").unwrap(),
            "/DOCS/readme.txt"
        );
    }

    #[test]
    fn unknown_parents_have_no_children() {
        let table = InodeTable::new();
        assert!(table.child_path(42, "x").is_none());
        assert!(table.path(42).is_none());
    }
}
