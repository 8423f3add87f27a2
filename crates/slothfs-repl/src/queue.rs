//! Replication queue and availability map.
//!
//! Entries move `queued -> copying -> done`, or `copying -> failed` and back to
//! the tail of the queue. While a path has any queued or in-flight entry, the
//! availability map pins it to the device that was written last, so readers
//! never pick a copy that is still being produced. The map changes in the same
//! call that changes the queue.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use slothfs_storage::Device;

/// A file waiting to be copied out from its origin device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Device holding the authoritative copy.
    pub device: Device,
    /// Namespace-relative path.
    pub relative: PathBuf,
    /// Failed copy passes so far.
    pub attempts: u32,
}

/// FIFO of pending replications plus the derived availability map.
#[derive(Debug, Default)]
pub struct ReplicationQueue {
    entries: VecDeque<QueueEntry>,
    in_flight: HashMap<PathBuf, usize>,
    origins: HashMap<PathBuf, Device>,
}

impl ReplicationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed write of `relative` on `device`.
    ///
    /// A path that is already queued keeps its slot; the entry just points at
    /// the new origin with a fresh attempt counter.
    pub fn push(&mut self, device: Device, relative: PathBuf) {
        self.origins.insert(relative.clone(), device.clone());
        if let Some(entry) = self.entries.iter_mut().find(|e| e.relative == relative) {
            entry.device = device;
            entry.attempts = 0;
            return;
        }
        self.entries.push_back(QueueEntry {
            device,
            relative,
            attempts: 0,
        });
    }

    /// Take the head of the queue and mark it in flight.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front()?;
        *self.in_flight.entry(entry.relative.clone()).or_insert(0) += 1;
        Some(entry)
    }

    /// The in-flight entry finished, successfully or for good.
    pub fn finish(&mut self, entry: &QueueEntry) {
        self.land(&entry.relative);
        self.release(&entry.relative);
    }

    /// The in-flight entry failed; put it back at the tail.
    ///
    /// If the path was written again meanwhile, the newer entry supersedes
    /// the failed one.
    pub fn requeue(&mut self, mut entry: QueueEntry) {
        self.land(&entry.relative);
        if self.is_queued(&entry.relative) {
            return;
        }
        entry.attempts += 1;
        self.origins
            .entry(entry.relative.clone())
            .or_insert_with(|| entry.device.clone());
        self.entries.push_back(entry);
    }

    /// Follow a rename of `from` to `to`, which may be a directory.
    ///
    /// Queued entries at or below `from` move with their origin pins. A path
    /// that is only in flight gets a fresh entry under its new name, since
    /// the running copy still targets the old one. Anything pending at the
    /// exact destination was overwritten and is forgotten.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.entries.retain(|e| e.relative != to);
        if !self.in_flight.contains_key(to) {
            self.origins.remove(to);
        }

        let moved: Vec<PathBuf> = self
            .origins
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            let Some(device) = self.origins.remove(&old) else {
                continue;
            };
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            match self.entries.iter_mut().find(|e| e.relative == old) {
                Some(entry) => entry.relative = new.clone(),
                None => self.entries.push_back(QueueEntry {
                    device: device.clone(),
                    relative: new.clone(),
                    attempts: 0,
                }),
            }
            self.origins.insert(new, device);
        }
    }

    /// Whether the copy of `relative` on `device` may be read.
    pub fn is_ready(&self, device: &Device, relative: &Path) -> bool {
        match self.origins.get(relative) {
            Some(origin) => origin == device,
            None => true,
        }
    }

    /// The device pinned for `relative`, if replication is pending.
    pub fn origin_of(&self, relative: &Path) -> Option<&Device> {
        self.origins.get(relative)
    }

    /// Queued entries, excluding in-flight ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries currently being copied.
    pub fn in_flight(&self) -> usize {
        self.in_flight.values().sum()
    }

    /// Paths with an availability entry.
    pub fn pending_paths(&self) -> usize {
        self.origins.len()
    }

    fn is_queued(&self, relative: &Path) -> bool {
        self.entries.iter().any(|e| e.relative == relative)
    }

    fn land(&mut self, relative: &Path) {
        if let Some(count) = self.in_flight.get_mut(relative) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(relative);
            }
        }
    }

    fn release(&mut self, relative: &Path) {
        if !self.is_queued(relative) && !self.in_flight.contains_key(relative) {
            self.origins.remove(relative);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &str) -> Device {
        Device::new(format!("/d/{}", name), ".s")
    }

    #[test]
    fn test_push_pins_origin() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        assert!(q.is_ready(&dev("a"), Path::new("f")));
        assert!(!q.is_ready(&dev("b"), Path::new("f")));
        assert!(q.is_ready(&dev("b"), Path::new("other")));
    }

    #[test]
    fn test_finish_clears_availability() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        let entry = q.pop().unwrap();
        assert!(!q.is_ready(&dev("b"), Path::new("f")));
        assert_eq!(q.in_flight(), 1);

        q.finish(&entry);
        assert!(q.is_ready(&dev("b"), Path::new("f")));
        assert_eq!(q.pending_paths(), 0);
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn test_push_existing_updates_in_place() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        q.push(dev("x"), PathBuf::from("g"));
        q.push(dev("b"), PathBuf::from("f"));
        assert_eq!(q.len(), 2);

        let head = q.pop().unwrap();
        assert_eq!(head.relative, PathBuf::from("f"));
        assert_eq!(head.device, dev("b"));
        assert!(q.is_ready(&dev("b"), Path::new("f")));
        assert!(!q.is_ready(&dev("a"), Path::new("f")));
    }

    #[test]
    fn test_requeue_goes_to_tail_and_counts_attempts() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        q.push(dev("a"), PathBuf::from("g"));
        let entry = q.pop().unwrap();
        q.requeue(entry);

        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().relative, PathBuf::from("g"));
        let retried = q.pop().unwrap();
        assert_eq!(retried.relative, PathBuf::from("f"));
        assert_eq!(retried.attempts, 1);
        assert!(!q.is_ready(&dev("b"), Path::new("f")));
    }

    #[test]
    fn test_write_during_copy_supersedes_failed_entry() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        let entry = q.pop().unwrap();
        q.push(dev("b"), PathBuf::from("f"));

        q.requeue(entry);
        assert_eq!(q.len(), 1);
        let next = q.pop().unwrap();
        assert_eq!(next.device, dev("b"));
        assert_eq!(next.attempts, 0);
    }

    #[test]
    fn test_in_flight_keeps_pin_until_last_lands() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        let first = q.pop().unwrap();
        q.push(dev("a"), PathBuf::from("f"));
        let second = q.pop().unwrap();

        q.finish(&first);
        assert!(!q.is_ready(&dev("b"), Path::new("f")));
        q.finish(&second);
        assert!(q.is_ready(&dev("b"), Path::new("f")));
    }

    #[test]
    fn test_rename_moves_queued_entry_and_pin() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("upload.part"));
        q.rename(Path::new("upload.part"), Path::new("final.bin"));

        assert_eq!(q.len(), 1);
        assert_eq!(q.origin_of(Path::new("upload.part")), None);
        assert!(!q.is_ready(&dev("b"), Path::new("final.bin")));
        let entry = q.pop().unwrap();
        assert_eq!(entry.relative, PathBuf::from("final.bin"));
        assert_eq!(entry.device, dev("a"));
    }

    #[test]
    fn test_rename_directory_moves_children() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("tmp/x"));
        q.push(dev("b"), PathBuf::from("tmp/sub/y"));
        q.push(dev("a"), PathBuf::from("tmpfile"));
        q.rename(Path::new("tmp"), Path::new("done"));

        assert_eq!(q.origin_of(Path::new("done/x")), Some(&dev("a")));
        assert_eq!(q.origin_of(Path::new("done/sub/y")), Some(&dev("b")));
        assert_eq!(q.origin_of(Path::new("tmpfile")), Some(&dev("a")));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_rename_of_in_flight_path_queues_new_name() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("f"));
        let running = q.pop().unwrap();
        q.rename(Path::new("f"), Path::new("g"));

        assert_eq!(q.len(), 1);
        assert_eq!(q.origin_of(Path::new("g")), Some(&dev("a")));
        q.finish(&running);
        assert_eq!(q.pop().unwrap().relative, PathBuf::from("g"));
    }

    #[test]
    fn test_rename_over_pending_destination_replaces_it() {
        let mut q = ReplicationQueue::new();
        q.push(dev("a"), PathBuf::from("src"));
        q.push(dev("b"), PathBuf::from("dst"));
        q.rename(Path::new("src"), Path::new("dst"));

        assert_eq!(q.len(), 1);
        assert_eq!(q.pending_paths(), 1);
        assert_eq!(q.origin_of(Path::new("dst")), Some(&dev("a")));
    }

    #[test]
    fn test_rename_of_unqueued_path_clears_destination_pin() {
        let mut q = ReplicationQueue::new();
        q.push(dev("b"), PathBuf::from("dst"));
        q.rename(Path::new("settled"), Path::new("dst"));

        assert!(q.is_empty());
        assert!(q.is_ready(&dev("a"), Path::new("dst")));
    }
}
