//! Compiled expression cache

use cel_interpreter::Program;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Fallback capacity when zero is requested
const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(500) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that had to compile
    pub misses: u64,
    /// Entries pushed out by newer ones
    pub evictions: u64,
    /// Current entry count
    pub size: usize,
    /// Maximum entry count
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Thread-safe LRU cache of compiled CEL programs keyed by source text
#[derive(Clone)]
pub struct CelProgramCache {
    cache: Arc<Mutex<LruCache<String, Arc<Program>>>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl CelProgramCache {
    /// Cache holding at most `capacity` programs
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            stats: Arc::new(Mutex::new(CacheStats {
                capacity: capacity.get(),
                ..CacheStats::default()
            })),
        }
    }

    /// Cached program for `expression`
    pub fn get(&self, expression: &str) -> Option<Arc<Program>> {
        let mut cache = lock(&self.cache);
        let mut stats = lock(&self.stats);
        match cache.get(expression) {
            Some(program) => {
                stats.hits += 1;
                Some(program.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Store a compiled program
    pub fn put(&self, expression: String, program: Arc<Program>) {
        let mut cache = lock(&self.cache);
        let mut stats = lock(&self.stats);
        if cache.push(expression, program).is_some() {
            stats.evictions += 1;
        }
        stats.size = cache.len();
    }

    /// Cached program, compiling and storing it on a miss
    pub fn get_or_compile(&self, expression: &str) -> Result<Arc<Program>, String> {
        if let Some(program) = self.get(expression) {
            return Ok(program);
        }
        let program = Arc::new(Program::compile(expression).map_err(|e| e.to_string())?);
        self.put(expression.to_string(), program.clone());
        Ok(program)
    }

    /// True when `expression` is cached, without touching recency or stats
    pub fn contains(&self, expression: &str) -> bool {
        lock(&self.cache).contains(expression)
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut cache = lock(&self.cache);
        let mut stats = lock(&self.stats);
        cache.clear();
        stats.size = 0;
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses() {
        let cache = CelProgramCache::new(4);
        assert!(cache.get_or_compile("1 + 1").is_ok());
        assert!(cache.get_or_compile("1 + 1").is_ok());
        assert!(cache.contains("1 + 1"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eviction() {
        let cache = CelProgramCache::new(1);
        cache.get_or_compile("1").unwrap();
        cache.get_or_compile("2").unwrap();
        assert!(!cache.contains("1"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_compile_error_is_not_cached() {
        let cache = CelProgramCache::new(2);
        assert!(cache.get_or_compile("1 +").is_err());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_zero_capacity_falls_back() {
        assert_eq!(CelProgramCache::new(0).stats().capacity, 500);
    }
}
