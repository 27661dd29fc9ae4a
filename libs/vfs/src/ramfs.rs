use alloc::{borrow::ToOwned, collections::BTreeMap, string::String};

use proc::{Gid, Uid};

use crate::{FileSystem, FsError, InodeId};

#[derive(Debug, Clone)]
pub struct Inode {
    pub mode: u16,
    pub uid: Uid,
    pub gid: Gid,
    /// Directory entries naming this inode.
    pub links: usize,
    /// Kernel references held through `create`.
    pub refs: usize,
    pub locked: bool,
}

/// A flat in-memory filesystem. Directories are implied by path prefixes.
pub struct RamFs {
    dev: u32,
    next: u32,
    names: BTreeMap<String, InodeId>,
    inodes: BTreeMap<InodeId, Inode>,
    capacity: usize,
}

impl RamFs {
    pub const fn new(dev: u32) -> Self {
        Self {
            dev,
            next: 1,
            names: BTreeMap::new(),
            inodes: BTreeMap::new(),
            capacity: usize::MAX,
        }
    }

    pub fn with_capacity(dev: u32, capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::new(dev)
        }
    }

    pub fn inode(&self, inode: InodeId) -> Option<&Inode> {
        self.inodes.get(&inode)
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    fn normalize(path: &str) -> Result<&str, FsError> {
        let path = path.trim_end_matches('/');
        if !path.starts_with('/') || path.len() < 2 {
            return Err(FsError::Invalid);
        }
        Ok(path)
    }

    fn collect(&mut self, inode: InodeId) {
        if let Some(node) = self.inodes.get(&inode) {
            if node.links == 0 && node.refs == 0 {
                self.inodes.remove(&inode);
            }
        }
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn lookup(&self, path: &str) -> Option<InodeId> {
        let path = Self::normalize(path).ok()?;
        self.names.get(path).copied()
    }

    fn create(&mut self, path: &str, mode: u16, uid: Uid, gid: Gid) -> Result<InodeId, FsError> {
        let path = Self::normalize(path)?;
        if self.names.contains_key(path) {
            return Err(FsError::Exists);
        }
        if self.inodes.len() >= self.capacity {
            return Err(FsError::NoSpace);
        }
        let id = InodeId::new(self.dev, self.next);
        self.next += 1;
        self.inodes.insert(
            id,
            Inode {
                mode,
                uid,
                gid,
                links: 1,
                refs: 1,
                locked: false,
            },
        );
        self.names.insert(path.to_owned(), id);
        Ok(id)
    }

    fn lock_inode(&mut self, inode: InodeId) -> Result<(), FsError> {
        let node = self.inodes.get_mut(&inode).ok_or(FsError::NotFound)?;
        if node.locked {
            return Err(FsError::Busy);
        }
        node.locked = true;
        Ok(())
    }

    fn unlock_inode(&mut self, inode: InodeId) -> Result<(), FsError> {
        let node = self.inodes.get_mut(&inode).ok_or(FsError::NotFound)?;
        if !node.locked {
            return Err(FsError::Invalid);
        }
        node.locked = false;
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<InodeId, FsError> {
        let path = Self::normalize(path)?;
        let id = self.names.remove(path).ok_or(FsError::NotFound)?;
        if let Some(node) = self.inodes.get_mut(&id) {
            node.links -= 1;
        }
        self.collect(id);
        Ok(id)
    }

    fn release_inode(&mut self, inode: InodeId) -> Result<(), FsError> {
        let node = self.inodes.get_mut(&inode).ok_or(FsError::NotFound)?;
        if node.refs == 0 {
            return Err(FsError::Invalid);
        }
        node.refs -= 1;
        self.collect(inode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let mut fs = RamFs::new(1);
        let a = fs.create("/sem/a", 0o644, 0, 0).unwrap();
        assert_eq!(fs.lookup("/sem/a"), Some(a));
        assert_eq!(fs.lookup("/sem/a/"), Some(a));
        assert_eq!(fs.lookup("/sem/b"), None);
        assert_eq!(fs.create("/sem/a", 0o644, 0, 0), Err(FsError::Exists));
        assert_eq!(fs.create("relative", 0o644, 0, 0), Err(FsError::Invalid));
    }

    #[test]
    fn inode_outlives_unlink_until_released() {
        let mut fs = RamFs::new(1);
        let a = fs.create("/sem/a", 0o644, 0, 0).unwrap();
        assert_eq!(fs.unlink("/sem/a"), Ok(a));
        assert_eq!(fs.lookup("/sem/a"), None);
        assert!(fs.inode(a).is_some());
        fs.release_inode(a).unwrap();
        assert!(fs.inode(a).is_none());
        let b = fs.create("/sem/a", 0o644, 0, 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn locks_are_exclusive() {
        let mut fs = RamFs::new(1);
        let a = fs.create("/sem/a", 0o644, 0, 0).unwrap();
        fs.lock_inode(a).unwrap();
        assert_eq!(fs.lock_inode(a), Err(FsError::Busy));
        fs.unlock_inode(a).unwrap();
        assert_eq!(fs.unlock_inode(a), Err(FsError::Invalid));
    }

    #[test]
    fn capacity_bound() {
        let mut fs = RamFs::with_capacity(1, 1);
        fs.create("/a", 0, 0, 0).unwrap();
        assert_eq!(fs.create("/b", 0, 0, 0), Err(FsError::NoSpace));
    }
}
