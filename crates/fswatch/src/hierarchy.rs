use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::EventKind;
use std::path::{Path, PathBuf};

/// What an event means for the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Ignore,
    /// The target itself was touched.
    Changed,
    /// The next directory down appeared; move the watch deeper.
    Descend,
    /// The watched directory went away; walk again from `/`.
    Restart,
}

/// The target file and its ancestors, root first. Exactly one ancestor is
/// watched at a time: the deepest one that exists.
#[derive(Debug)]
pub(crate) struct Hierarchy {
    target: PathBuf,
    dirs: Vec<PathBuf>,
    level: usize,
}

impl Hierarchy {
    /// `target` must be absolute and have a parent.
    pub fn new(target: PathBuf) -> Self {
        let mut dirs: Vec<PathBuf> = target.ancestors().skip(1).map(Path::to_path_buf).collect();
        dirs.reverse();
        Self {
            target,
            dirs,
            level: 0,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn dir(&self, level: usize) -> &Path {
        &self.dirs[level]
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn set_level(&mut self, level: usize) {
        self.level = level;
    }

    /// Probe downward from `from` while the next directory exists.
    pub fn deepest_existing(&self, from: usize) -> usize {
        let mut level = from.min(self.dirs.len() - 1);
        while level + 1 < self.dirs.len() && self.dirs[level + 1].is_dir() {
            level += 1;
        }
        level
    }

    pub fn classify(&self, kind: &EventKind, path: &Path) -> Step {
        if path == self.target {
            return if touches_content(kind) {
                Step::Changed
            } else {
                Step::Ignore
            };
        }
        if path == self.dirs[self.level] && vanished(kind) {
            return Step::Restart;
        }
        if self.dirs.get(self.level + 1).is_some_and(|next| next == path) && appeared(kind) {
            return Step::Descend;
        }
        Step::Ignore
    }
}

fn appeared(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

fn vanished(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Both | RenameMode::Any))
    )
}

/// Reads and opens do not count; a close after writing does.
fn touches_content(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}
