//! Process-wide kernel cache.
//!
//! Compiled kernels are memoized by their structural key and shared by
//! reference among filter instances. Entries are never evicted; concurrent
//! compilations of the same key may race and the last writer wins, which is
//! sound because kernels are pure functions of their key.

use std::sync::{Arc, Mutex, OnceLock};

use rustc_hash::FxHashMap;

use crate::kernel::CompiledKernel;

fn cache() -> &'static Mutex<FxHashMap<String, Arc<CompiledKernel>>> {
    static CACHE: OnceLock<Mutex<FxHashMap<String, Arc<CompiledKernel>>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

pub fn lookup(key: &str) -> Option<Arc<CompiledKernel>> {
    let guard = cache().lock().unwrap_or_else(|e| e.into_inner());
    let hit = guard.get(key).cloned();
    log::debug!(
        "kernel cache {}: {key}",
        if hit.is_some() { "hit" } else { "miss" }
    );
    hit
}

pub fn insert(key: String, kernel: Arc<CompiledKernel>) -> Arc<CompiledKernel> {
    let mut guard = cache().lock().unwrap_or_else(|e| e.into_inner());
    guard.insert(key, kernel.clone());
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::KernelProgram;
    use crate::types::{Format, SampleType};

    fn dummy_kernel() -> Arc<CompiledKernel> {
        let program = KernelProgram {
            ops: Vec::new(),
            prop_access: Vec::new(),
            num_vars: 0,
            force_float: true,
            output: Format::new(SampleType::Float, 32),
            inputs: Vec::new(),
            networks: Default::default(),
            max_depth: 1,
        };
        Arc::new(CompiledKernel::new(program))
    }

    #[test]
    fn test_insert_then_lookup_shares_handle() {
        let k = dummy_kernel();
        let stored = insert("test-cache-key-a".into(), k.clone());
        assert!(Arc::ptr_eq(&k, &stored));
        let found = lookup("test-cache-key-a").expect("cached");
        assert!(Arc::ptr_eq(&k, &found));
    }

    #[test]
    fn test_lookup_missing() {
        assert!(lookup("test-cache-key-never-inserted").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let a = dummy_kernel();
        let b = dummy_kernel();
        insert("test-cache-key-b".into(), a);
        insert("test-cache-key-b".into(), b.clone());
        let found = lookup("test-cache-key-b").expect("cached");
        assert!(Arc::ptr_eq(&b, &found));
    }
}
