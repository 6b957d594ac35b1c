/*!
 * In-Memory Filesystem Backend
 * Volatile filesystem with an optional descriptor ceiling
 */

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::traits::FileSystem;
use super::types::*;
use crate::core::limits::FIRST_DESCRIPTOR;
use crate::core::types::Fd;

/// In-memory filesystem node
#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        permissions: Permissions,
        modified: SystemTime,
        created: SystemTime,
    },
    Directory {
        children: HashMap<String, PathBuf>,
        permissions: Permissions,
        created: SystemTime,
    },
}

impl Node {
    fn directory() -> Self {
        Node::Directory {
            children: HashMap::new(),
            permissions: Permissions::directory(),
            created: SystemTime::now(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn file_type(&self) -> FileType {
        match self {
            Node::File { .. } => FileType::File,
            Node::Directory { .. } => FileType::Directory,
        }
    }
}

#[derive(Debug)]
struct OpenDescriptor {
    path: PathBuf,
    flags: OpenFlags,
    position: usize,
}

/// Descriptor bookkeeping
///
/// `reserved` counts slots claimed by operations still in flight (an `open`
/// that has not finished, or a whole-file read/listing that holds a
/// descriptor only while it runs). Reserved slots count against the limit.
#[derive(Debug)]
struct DescriptorTable {
    open: HashMap<Fd, OpenDescriptor>,
    reserved: usize,
    next_fd: Fd,
    peak: usize,
}

impl DescriptorTable {
    fn new() -> Self {
        Self {
            open: HashMap::new(),
            reserved: 0,
            next_fd: FIRST_DESCRIPTOR,
            peak: 0,
        }
    }

    fn in_use(&self) -> usize {
        self.open.len() + self.reserved
    }

    fn reserve(&mut self, limit: Option<usize>, context: impl FnOnce() -> String) -> VfsResult<()> {
        if let Some(limit) = limit {
            if self.in_use() >= limit {
                return Err(VfsError::TooManyOpenFiles(context()));
            }
        }
        self.reserved += 1;
        self.peak = self.peak.max(self.in_use());
        Ok(())
    }

    fn cancel(&mut self) {
        self.reserved -= 1;
    }

    fn commit(&mut self, descriptor: OpenDescriptor) -> Fd {
        self.reserved -= 1;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, descriptor);
        fd
    }
}

/// In-memory filesystem implementation
///
/// With a descriptor limit set, `open`, `read_file`, `write_file` and
/// `read_dir` fail with `TooManyOpenFiles` once that many descriptors are in
/// use, the way a process at its `RLIMIT_NOFILE` would. Directory listings
/// come back in hash order.
#[derive(Debug, Clone)]
pub struct MemFS {
    nodes: Arc<DashMap<PathBuf, Node, RandomState>>,
    descriptors: Arc<Mutex<DescriptorTable>>,
    max_descriptors: Option<usize>,
}

impl MemFS {
    /// Create new in-memory filesystem
    pub fn new() -> Self {
        let nodes = DashMap::with_hasher(RandomState::new());

        // Create root directory
        nodes.insert(PathBuf::from("/"), Node::directory());

        Self {
            nodes: Arc::new(nodes),
            descriptors: Arc::new(Mutex::new(DescriptorTable::new())),
            max_descriptors: None,
        }
    }

    /// Create with a ceiling on simultaneously open descriptors
    pub fn with_descriptor_limit(max_descriptors: usize) -> Self {
        let mut fs = Self::new();
        fs.max_descriptors = Some(max_descriptors);
        fs
    }

    /// Descriptors currently open
    pub fn open_descriptors(&self) -> usize {
        self.descriptors.lock().open.len()
    }

    /// Most descriptors ever in use at once
    pub fn peak_descriptors(&self) -> usize {
        self.descriptors.lock().peak
    }

    /// Normalize path (make absolute and clean)
    fn normalize(&self, path: &Path) -> PathBuf {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new("/").join(path)
        };

        PathBuf::from(path_clean::clean(&path))
    }

    fn file_name(path: &Path) -> VfsResult<String> {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| VfsError::InvalidPath(format!("invalid path: {}", path.display())))
    }

    /// Run `op` while holding a descriptor slot for its duration
    fn with_transient_descriptor<T>(
        &self,
        context: impl FnOnce() -> String,
        op: impl FnOnce() -> VfsResult<T>,
    ) -> VfsResult<T> {
        self.descriptors
            .lock()
            .reserve(self.max_descriptors, context)?;
        let result = op();
        self.descriptors.lock().cancel();
        result
    }

    /// Ensure parent directory exists
    fn ensure_parent(&self, path: &Path) -> VfsResult<()> {
        if let Some(parent) = path.parent() {
            match self.nodes.get(parent).map(|n| n.is_dir()) {
                Some(true) => {}
                Some(false) => return Err(VfsError::NotADirectory(parent.display().to_string())),
                None => {
                    return Err(VfsError::NotFound(format!(
                        "parent directory not found: {}",
                        parent.display()
                    )))
                }
            }
        }
        Ok(())
    }

    fn add_child(&self, path: &Path) -> VfsResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let name = Self::file_name(path)?;

        match self.nodes.get_mut(parent) {
            Some(mut node) => match node.value_mut() {
                Node::Directory { children, .. } => {
                    children.insert(name, path.to_path_buf());
                    Ok(())
                }
                Node::File { .. } => Err(VfsError::NotADirectory(parent.display().to_string())),
            },
            None => Err(VfsError::NotFound(parent.display().to_string())),
        }
    }

    fn remove_child(&self, path: &Path) {
        if let (Some(parent), Ok(name)) = (path.parent(), Self::file_name(path)) {
            if let Some(mut node) = self.nodes.get_mut(parent) {
                if let Node::Directory { children, .. } = node.value_mut() {
                    children.remove(&name);
                }
            }
        }
    }

    /// Create or truncate the node an `open` targets
    fn prepare_open(&self, path: &Path, flags: OpenFlags, mode: OpenMode) -> VfsResult<()> {
        let existing = self.nodes.get(path).map(|n| n.is_dir());

        match existing {
            Some(true) if flags.is_writable() => {
                Err(VfsError::IsADirectory(path.display().to_string()))
            }
            Some(_) if flags.create_new => {
                Err(VfsError::AlreadyExists(path.display().to_string()))
            }
            Some(is_dir) => {
                if flags.truncate && !is_dir {
                    if let Some(mut node) = self.nodes.get_mut(path) {
                        if let Node::File { data, modified, .. } = node.value_mut() {
                            data.clear();
                            *modified = SystemTime::now();
                        }
                    }
                }
                Ok(())
            }
            None if flags.will_create() => {
                self.ensure_parent(path)?;
                let now = SystemTime::now();
                self.nodes.insert(
                    path.to_path_buf(),
                    Node::File {
                        data: Vec::new(),
                        permissions: mode.permissions,
                        modified: now,
                        created: now,
                    },
                );
                self.add_child(path)
            }
            None => Err(VfsError::NotFound(path.display().to_string())),
        }
    }
}

impl Default for MemFS {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFS {
    fn open(&self, path: &Path, flags: OpenFlags, mode: OpenMode) -> VfsResult<Fd> {
        flags.validate()?;
        let path = self.normalize(path);

        // Claim the slot before touching the tree so an exhausted open leaves no trace
        self.descriptors
            .lock()
            .reserve(self.max_descriptors, || format!("open {}", path.display()))?;

        if let Err(e) = self.prepare_open(&path, flags, mode) {
            self.descriptors.lock().cancel();
            return Err(e);
        }

        Ok(self.descriptors.lock().commit(OpenDescriptor {
            path,
            flags,
            position: 0,
        }))
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        self.descriptors
            .lock()
            .open
            .remove(&fd)
            .map(|_| ())
            .ok_or(VfsError::BadDescriptor(fd))
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        let mut table = self.descriptors.lock();
        let descriptor = table.open.get_mut(&fd).ok_or(VfsError::BadDescriptor(fd))?;
        if !descriptor.flags.read {
            return Err(VfsError::BadDescriptor(fd));
        }

        let node = self.nodes.get(&descriptor.path);
        match node.as_deref() {
            Some(Node::File { data, .. }) => {
                let start = descriptor.position.min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                descriptor.position = start + n;
                Ok(n)
            }
            Some(Node::Directory { .. }) => Err(VfsError::IsADirectory(
                descriptor.path.display().to_string(),
            )),
            None => Err(VfsError::NotFound(descriptor.path.display().to_string())),
        }
    }

    fn write(&self, fd: Fd, data: &[u8]) -> VfsResult<usize> {
        let mut table = self.descriptors.lock();
        let descriptor = table.open.get_mut(&fd).ok_or(VfsError::BadDescriptor(fd))?;
        if !descriptor.flags.is_writable() {
            return Err(VfsError::BadDescriptor(fd));
        }

        let mut node = self
            .nodes
            .get_mut(&descriptor.path)
            .ok_or_else(|| VfsError::NotFound(descriptor.path.display().to_string()))?;
        match node.value_mut() {
            Node::File {
                data: contents,
                modified,
                ..
            } => {
                let start = if descriptor.flags.append {
                    contents.len()
                } else {
                    descriptor.position
                };
                let end = start + data.len();
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[start..end].copy_from_slice(data);
                descriptor.position = end;
                *modified = SystemTime::now();
                Ok(data.len())
            }
            Node::Directory { .. } => Err(VfsError::IsADirectory(
                descriptor.path.display().to_string(),
            )),
        }
    }

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let path = self.normalize(path);

        self.with_transient_descriptor(
            || format!("read {}", path.display()),
            || match self.nodes.get(&path).map(|n| n.clone()) {
                Some(Node::File { data, .. }) => Ok(data),
                Some(Node::Directory { .. }) => {
                    Err(VfsError::IsADirectory(path.display().to_string()))
                }
                None => Err(VfsError::NotFound(path.display().to_string())),
            },
        )
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let path = self.normalize(path);

        self.with_transient_descriptor(
            || format!("write {}", path.display()),
            || {
                self.prepare_open(&path, OpenFlags::write_truncate(), OpenMode::default())?;
                if let Some(mut node) = self.nodes.get_mut(&path) {
                    if let Node::File {
                        data: contents,
                        modified,
                        ..
                    } = node.value_mut()
                    {
                        *contents = data.to_vec();
                        *modified = SystemTime::now();
                    }
                }
                Ok(())
            },
        )
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Entry>> {
        let path = self.normalize(path);

        self.with_transient_descriptor(
            || format!("read_dir {}", path.display()),
            || {
                let children = match self.nodes.get(&path).map(|n| n.clone()) {
                    Some(Node::Directory { children, .. }) => children,
                    Some(Node::File { .. }) => {
                        return Err(VfsError::NotADirectory(path.display().to_string()))
                    }
                    None => return Err(VfsError::NotFound(path.display().to_string())),
                };

                Ok(children
                    .into_iter()
                    .map(|(name, child)| {
                        let file_type = self
                            .nodes
                            .get(&child)
                            .map(|n| n.file_type())
                            .unwrap_or_default();
                        Entry::new_unchecked(name, file_type)
                    })
                    .collect())
            },
        )
    }

    fn metadata(&self, path: &Path) -> VfsResult<Metadata> {
        let path = self.normalize(path);

        match self.nodes.get(&path).map(|n| n.clone()) {
            Some(Node::File {
                data,
                permissions,
                modified,
                created,
            }) => Ok(Metadata {
                file_type: FileType::File,
                size: data.len() as u64,
                permissions,
                modified,
                created,
            }),
            Some(Node::Directory {
                permissions,
                created,
                ..
            }) => Ok(Metadata {
                file_type: FileType::Directory,
                size: 0,
                permissions,
                modified: created,
                created,
            }),
            None => Err(VfsError::NotFound(path.display().to_string())),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let path = self.normalize(path);
        self.nodes.contains_key(&path)
    }

    fn create_dir(&self, path: &Path) -> VfsResult<()> {
        let path = self.normalize(path);

        // Create parents first, root is always present
        let mut current = PathBuf::from("/");
        for component in path.components().skip(1) {
            current.push(component);
            match self.nodes.get(&current).map(|n| n.is_dir()) {
                Some(true) => continue,
                Some(false) => {
                    return Err(VfsError::NotADirectory(current.display().to_string()))
                }
                None => {
                    self.nodes.insert(current.clone(), Node::directory());
                    self.add_child(&current)?;
                }
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> VfsResult<()> {
        let path = self.normalize(path);

        match self.nodes.get(&path).map(|n| n.is_dir()) {
            Some(false) => {
                self.nodes.remove(&path);
                self.remove_child(&path);
                Ok(())
            }
            Some(true) => Err(VfsError::IsADirectory(path.display().to_string())),
            None => Err(VfsError::NotFound(path.display().to_string())),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> VfsResult<()> {
        let path = self.normalize(path);

        if !self.nodes.get(&path).map(|n| n.is_dir()).unwrap_or(false) {
            return Err(VfsError::NotADirectory(path.display().to_string()));
        }
        if path == Path::new("/") {
            return Err(VfsError::InvalidArgument("cannot remove root".into()));
        }

        self.nodes.retain(|p, _| !p.starts_with(&path));
        self.remove_child(&path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from = self.normalize(from);
        let to = self.normalize(to);

        let node = match self.nodes.get(&from).map(|n| n.clone()) {
            Some(node @ Node::File { .. }) => node,
            Some(Node::Directory { .. }) => {
                return Err(VfsError::NotSupported(
                    "renaming directories is not supported".into(),
                ))
            }
            None => return Err(VfsError::NotFound(from.display().to_string())),
        };

        self.ensure_parent(&to)?;
        if self.nodes.get(&to).map(|n| n.is_dir()).unwrap_or(false) {
            return Err(VfsError::IsADirectory(to.display().to_string()));
        }

        self.nodes.remove(&from);
        self.remove_child(&from);
        self.nodes.insert(to.clone(), node);
        self.add_child(&to)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
