//! Folder hierarchy of an archive.
//!
//! The file format only stores folders that directly contain files, each
//! under its full path. The tree rebuilds the hierarchy from those paths,
//! adding intermediate folders as needed. Nodes live in an arena and refer
//! to each other by [`FolderId`], so a parent link never owns anything.

use super::entry::FileEntry;
use super::hash::{PATH_SEPARATOR, name_hash};

/// Handle of a folder inside a [`FolderTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(usize);

/// Handle of a file: its folder and position within that folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub folder: FolderId,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Folder {
    name: String,
    name_hash: u64,
    parent: Option<FolderId>,
    subfolders: Vec<FolderId>,
    files: Vec<FileEntry>,
}

impl Folder {
    fn new(name: &str, parent: Option<FolderId>) -> Self {
        Self {
            name: name.to_string(),
            name_hash: 0,
            parent,
            subfolders: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Last path segment of this folder
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn subfolders(&self) -> &[FolderId] {
        &self.subfolders
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn num_subfolders(&self) -> usize {
        self.subfolders.len()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn set_name_hash(&mut self, hash: u64) {
        self.name_hash = hash;
    }
}

#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<Folder>,
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Folder::new("", None)],
        }
    }

    pub fn root(&self) -> FolderId {
        FolderId(0)
    }

    pub fn folder(&self, id: FolderId) -> &Folder {
        &self.nodes[id.0]
    }

    pub(crate) fn folder_mut(&mut self, id: FolderId) -> &mut Folder {
        &mut self.nodes[id.0]
    }

    pub fn subfolder(&self, id: FolderId, index: usize) -> Option<FolderId> {
        self.folder(id).subfolders.get(index).copied()
    }

    pub fn file(&self, file: FileRef) -> Option<&FileEntry> {
        self.nodes.get(file.folder.0)?.files.get(file.index)
    }

    pub(crate) fn file_mut(&mut self, file: FileRef) -> Option<&mut FileEntry> {
        self.nodes.get_mut(file.folder.0)?.files.get_mut(file.index)
    }

    /// Path of a folder from the root, segments joined with `\`. The root
    /// itself has an empty path.
    pub fn full_path(&self, id: FolderId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let folder = self.folder(folder_id);
            if folder.parent.is_some() {
                segments.push(folder.name.as_str());
            }
            current = folder.parent;
        }
        segments.reverse();
        segments.join("\\")
    }

    /// Path of a file inside the archive.
    pub fn file_path(&self, file: FileRef) -> Option<String> {
        let entry = self.file(file)?;
        let folder_path = self.full_path(file.folder);
        if folder_path.is_empty() {
            Some(entry.name().to_string())
        } else {
            Some(format!("{folder_path}{PATH_SEPARATOR}{}", entry.name()))
        }
    }

    /// Number of files in a folder and all folders below it.
    pub fn count_files(&self, id: FolderId) -> usize {
        let folder = self.folder(id);
        folder.files.len()
            + folder
                .subfolders
                .iter()
                .map(|&child| self.count_files(child))
                .sum::<usize>()
    }

    /// Get or create the folder at `path` below `parent`. Segments may be
    /// separated by `\` or `/`, existing folders are matched ignoring case.
    pub fn add_folder(&mut self, parent: FolderId, path: &str) -> FolderId {
        let mut current = parent;
        for segment in path.split(['\\', '/']).filter(|segment| !segment.is_empty()) {
            current = match self.find_child(current, segment) {
                Some(existing) => existing,
                None => self.push_child(current, segment),
            };
        }
        current
    }

    pub fn add_file(&mut self, folder: FolderId, entry: FileEntry) -> FileRef {
        let files = &mut self.folder_mut(folder).files;
        files.push(entry);
        FileRef {
            folder,
            index: files.len() - 1,
        }
    }

    /// Place a folder read from an archive, given its full path.
    ///
    /// The path is matched against existing folders one level at a time. A
    /// child matches when the remaining path starts with its name followed by
    /// a separator and at least one more character; the matched part is then
    /// stripped and placement continues below that child. When nothing
    /// matches, the next segment reuses a child of the same name or creates
    /// one, so that insertion order does not change the tree shape. Empty
    /// segments from doubled or trailing separators are skipped.
    pub fn insert_path(&mut self, path: &str) -> FolderId {
        let mut current = self.root();
        let mut remaining = path;

        'descend: loop {
            if remaining.is_empty() {
                return current;
            }

            for &child in &self.nodes[current.0].subfolders {
                if let Some(rest) = strip_segment(remaining, &self.nodes[child.0].name) {
                    current = child;
                    remaining = rest;
                    continue 'descend;
                }
            }

            match remaining.find(['\\', '/']) {
                None => return self.child_or_new(current, remaining),
                Some(pos) => {
                    let segment = &remaining[..pos];
                    if !segment.is_empty() {
                        current = self.child_or_new(current, segment);
                    }
                    remaining = &remaining[pos + 1..];
                }
            }
        }
    }

    /// Folders that directly hold files, depth first in child order.
    pub fn collect_folders(&self) -> Vec<FolderId> {
        let mut result = Vec::new();
        if !self.folder(self.root()).files.is_empty() {
            result.push(self.root());
        }
        self.collect_folders_below(self.root(), &mut result);
        result
    }

    fn collect_folders_below(&self, id: FolderId, result: &mut Vec<FolderId>) {
        for &child in &self.folder(id).subfolders {
            if !self.folder(child).files.is_empty() {
                result.push(child);
            }
            self.collect_folders_below(child, result);
        }
    }

    /// Every file in the tree, each folder's own files before its subfolders.
    pub fn collect_files(&self) -> Vec<FileRef> {
        let mut result = Vec::new();
        self.collect_files_below(self.root(), &mut result);
        result
    }

    fn collect_files_below(&self, id: FolderId, result: &mut Vec<FileRef>) {
        let folder = self.folder(id);
        result.extend((0..folder.files.len()).map(|index| FileRef { folder: id, index }));
        for &child in &folder.subfolders {
            self.collect_files_below(child, result);
        }
    }

    /// Full paths of all folders that directly hold files.
    pub fn folder_names(&self) -> Vec<String> {
        self.collect_folders()
            .into_iter()
            .map(|id| self.full_path(id))
            .collect()
    }

    /// Names of all files, in [`collect_files`](Self::collect_files) order.
    pub fn file_names(&self) -> Vec<String> {
        self.collect_files()
            .into_iter()
            .filter_map(|file| self.file(file).map(|entry| entry.name().to_string()))
            .collect()
    }

    fn find_child(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        self.folder(parent)
            .subfolders
            .iter()
            .copied()
            .find(|&child| self.folder(child).name.eq_ignore_ascii_case(name))
    }

    fn child_or_new(&mut self, parent: FolderId, name: &str) -> FolderId {
        match self.find_child(parent, name) {
            Some(existing) => existing,
            None => self.push_child(parent, name),
        }
    }

    fn push_child(&mut self, parent: FolderId, name: &str) -> FolderId {
        let id = FolderId(self.nodes.len());
        self.nodes.push(Folder::new(name, Some(parent)));
        self.nodes[parent.0].subfolders.push(id);
        let hash = name_hash(&self.full_path(id));
        self.nodes[id.0].name_hash = hash;
        id
    }
}

/// Strip `name` and one separator from the front of `path`, provided more
/// path follows.
fn strip_segment<'a>(path: &'a str, name: &str) -> Option<&'a str> {
    let bytes = path.as_bytes();
    let len = name.len();
    if bytes.len() <= len + 1 || !bytes[..len].eq_ignore_ascii_case(name.as_bytes()) {
        return None;
    }
    match bytes[len] {
        b'\\' | b'/' => Some(&path[len + 1..]),
        _ => None,
    }
}
