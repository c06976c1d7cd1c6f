//! Lock helpers for the few places where the driver uses std synchronization primitives
//! directly: the trampoline table (`Mutex`), the constructor-barrier set and the run state
//! (`RwLock`). A poisoned lock means a worker panicked while holding it; there is nothing left
//! to recover at that point.

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut state = lock!(self.state);
///  state.table.push(id);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let classes = read_lock!(self.barrier_classes);
///  classes.contains(&class)
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  write_lock!(self.barrier_classes).insert(class);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}
