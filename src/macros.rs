#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut changes = lock!(self.visibility_changes);
///  changes.extend(local);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let code = read_lock!(method.code);
///  let size = code.as_ref().map_or(0, IrCode::count_opcodes);
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut access = write_lock!(method.access);
///  access.insert(AccessFlags::STATIC);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}
