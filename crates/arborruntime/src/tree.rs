//! Tree & lifecycle manager.
//!
//! Attach and detach are check-then-act under one process-wide structure
//! lock: every integrity check runs before anything is mutated, so a failed
//! call leaves both units exactly as they were. Events are emitted after the
//! lock is released, which lets observers mutate the tree themselves.

use crate::dispatch;
use crate::lock;
use crate::unit::ExecutionUnit;
use arborcore::{EventKind, NodeId, NodeStatus, Observer, TreeError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

/// Upper bound on ancestor walks, guarding against cycles introduced behind the manager's back
pub const MAX_TREE_DEPTH: usize = 10_000;

static STRUCTURE: Mutex<()> = Mutex::new(());

impl ExecutionUnit {
    /// Attach `child` as the last child of `self`
    pub fn attach(&self, child: &ExecutionUnit) -> Result<(), TreeError> {
        {
            let _structure = lock(&STRUCTURE);
            self.check_attach(child)?;
            self.link(child);
        }
        self.attached(child);
        Ok(())
    }

    /// Attach every unit in `children` that is not already a child of `self`
    ///
    /// All units are checked before any is linked, under one hold of the
    /// structure lock; on error nothing is attached.
    pub(crate) fn attach_many(&self, children: &[ExecutionUnit]) -> Result<(), TreeError> {
        let linked = {
            let _structure = lock(&STRUCTURE);
            let mut seen = HashSet::new();
            for child in children {
                if !seen.insert(child.id()) {
                    return Err(TreeError::DuplicateAttachment {
                        parent: self.label(),
                        child: child.label(),
                    });
                }
                if !self.has_child(child) {
                    self.check_attach(child)?;
                }
            }

            let mut linked = Vec::new();
            for child in children {
                if !self.has_child(child) {
                    self.link(child);
                    linked.push(child.clone());
                }
            }
            linked
        };

        for child in &linked {
            self.attached(child);
        }
        Ok(())
    }

    /// Set both links; caller holds the structure lock and has run `check_attach`
    fn link(&self, child: &ExecutionUnit) {
        lock(&child.inner.links).parent = Arc::downgrade(&self.inner);
        let mut links = lock(&self.inner.links);
        links.children.push(child.clone());
        links.child_ids.push(child.id());
    }

    fn attached(&self, child: &ExecutionUnit) {
        if !lock(&child.inner.observers).is_empty() {
            tracing::warn!(
                child = %child.label(),
                "attached unit has its own observers; they stop receiving events while it is not a root"
            );
        }
        tracing::debug!(parent = %self.label(), child = %child.label(), "child attached");

        self.emit(EventKind::ChildAttached {
            parent: self.node_info(),
            child: child.node_info(),
        });
        self.tree_updated();
    }

    /// Remove `child` from `self`; the child keeps its own subtree
    pub fn detach(&self, child: &ExecutionUnit) -> Result<(), TreeError> {
        {
            let _structure = lock(&STRUCTURE);
            let mut links = lock(&self.inner.links);
            let position = links
                .children
                .iter()
                .position(|c| c.ptr_eq(child))
                .ok_or_else(|| TreeError::NotAttached {
                    parent: self.label(),
                    child: child.label(),
                })?;
            links.children.remove(position);
            if let Some(index) = links.child_ids.iter().position(|id| *id == child.id()) {
                links.child_ids.remove(index);
            }
            drop(links);
            lock(&child.inner.links).parent = Weak::new();
        }

        tracing::debug!(parent = %self.label(), child = %child.label(), "child detached");

        self.emit(EventKind::ChildDetached {
            parent: self.node_info(),
            child: child.node_info(),
        });
        self.tree_updated();
        Ok(())
    }

    /// Validate an attach without mutating anything
    pub(crate) fn check_attach(&self, child: &ExecutionUnit) -> Result<(), TreeError> {
        let circular = || TreeError::CircularReference {
            parent: self.label(),
            child: child.label(),
        };

        // Walk up from the new parent; meeting the child means it is an ancestor.
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut cursor = Some(self.clone());
        while let Some(unit) = cursor {
            if unit.ptr_eq(child) || !visited.insert(unit.id()) || visited.len() > MAX_TREE_DEPTH {
                return Err(circular());
            }
            cursor = unit.parent();
        }

        if let Some(current) = child.parent() {
            if !current.ptr_eq(self) {
                return Err(TreeError::ParentConflict {
                    child: child.label(),
                    current_parent: current.label(),
                    new_parent: self.label(),
                });
            }
        }

        if lock(&self.inner.links).children.iter().any(|c| c.ptr_eq(child)) {
            return Err(TreeError::DuplicateAttachment {
                parent: self.label(),
                child: child.label(),
            });
        }

        Ok(())
    }

    /// True when `child` is already in this unit's children list
    pub fn has_child(&self, child: &ExecutionUnit) -> bool {
        lock(&self.inner.links).children.iter().any(|c| c.ptr_eq(child))
    }

    /// Topmost ancestor, or `self` for a root
    pub fn root(&self) -> Result<ExecutionUnit, TreeError> {
        let mut visited: HashSet<NodeId> = HashSet::from([self.id()]);
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            if !visited.insert(parent.id()) || visited.len() > MAX_TREE_DEPTH {
                return Err(TreeError::CircularReference {
                    parent: parent.label(),
                    child: self.label(),
                });
            }
            current = parent;
        }
        Ok(current)
    }

    /// Number of ancestors above this unit
    pub fn depth(&self) -> Result<usize, TreeError> {
        let root = self.root()?;
        let mut depth = 0;
        let mut current = self.clone();
        while !current.ptr_eq(&root) {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
            depth += 1;
        }
        Ok(depth)
    }

    /// Observers registered at this unit's root
    pub fn observers(&self) -> Result<Vec<Arc<dyn Observer>>, TreeError> {
        let root = self.root()?;
        let observers = lock(&root.inner.observers).clone();
        Ok(observers)
    }

    /// Register an observer; only roots accept observers
    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> Result<(), TreeError> {
        let _structure = lock(&STRUCTURE);
        if let Some(parent) = self.parent() {
            return Err(TreeError::NotRoot {
                unit: self.label(),
                parent: parent.label(),
            });
        }
        tracing::debug!(unit = %self.label(), observer = observer.name(), "observer registered");
        lock(&self.inner.observers).push(observer);
        Ok(())
    }

    /// Move the unit through its lifecycle; see [`NodeStatus::can_transition_to`]
    pub fn set_status(&self, status: NodeStatus) -> Result<(), TreeError> {
        {
            let mut record = lock(&self.inner.record);
            let from = record.status;
            if !from.can_transition_to(status) {
                return Err(TreeError::InvalidTransition {
                    unit: self.label(),
                    from,
                    to: status,
                });
            }
            record.status = status;
        }
        tracing::debug!(unit = %self.label(), %status, "status changed");
        self.tree_updated();
        Ok(())
    }

    /// Emit `treeUpdated` and hand the root's snapshot to observers
    fn tree_updated(&self) {
        match self.root() {
            Ok(root) => self.emit(EventKind::TreeUpdated {
                root: root.node_info(),
            }),
            Err(err) => tracing::warn!(unit = %self.label(), error = %err, "cannot resolve root"),
        }
        dispatch::tree_changed(self);
    }
}
