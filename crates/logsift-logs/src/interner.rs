use std::collections::HashSet;
use std::sync::Arc;

use logsift_types::{Record, TextField};

/// Fields whose values repeat heavily across a file and are worth sharing
const INTERNED_FIELDS: [TextField; 9] = [
    TextField::Level,
    TextField::Logger,
    TextField::Thread,
    TextField::Host,
    TextField::Machine,
    TextField::User,
    TextField::Application,
    TextField::Class,
    TextField::Method,
];

/// Per-load string cache that makes equal field values share one allocation.
///
/// One interner lives for exactly one load so that memory is released with
/// the batch and concurrent loads never contend on a shared cache.
#[derive(Debug, Default)]
pub struct FieldInterner {
    caches: [HashSet<Arc<str>>; INTERNED_FIELDS.len()],
}

impl FieldInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance for `value` in `field`'s cache
    pub fn intern(&mut self, field: TextField, value: &str) -> Arc<str> {
        let Some(cache) = self.cache_mut(field) else {
            return Arc::from(value);
        };
        if let Some(existing) = cache.get(value) {
            return Arc::clone(existing);
        }
        let canonical: Arc<str> = Arc::from(value);
        cache.insert(Arc::clone(&canonical));
        canonical
    }

    /// Intern an optional value; `None` passes through without touching the cache
    pub fn intern_opt(&mut self, field: TextField, value: Option<&str>) -> Option<Arc<str>> {
        value.map(|v| self.intern(field, v))
    }

    /// Replace the repeated fields of a record with their canonical instances
    pub fn intern_record(&mut self, mut record: Record) -> Record {
        record.level = self.intern(TextField::Level, &record.level);
        record.logger = self.intern(TextField::Logger, &record.logger);
        record.thread = self.intern(TextField::Thread, &record.thread);
        record.host = self.intern_opt(TextField::Host, record.host.as_deref());
        record.machine = self.intern_opt(TextField::Machine, record.machine.as_deref());
        record.user = self.intern_opt(TextField::User, record.user.as_deref());
        record.application =
            self.intern_opt(TextField::Application, record.application.as_deref());
        record.class = self.intern_opt(TextField::Class, record.class.as_deref());
        record.method = self.intern_opt(TextField::Method, record.method.as_deref());
        record
    }

    /// Number of distinct values held across all field caches
    pub fn len(&self) -> usize {
        self.caches.iter().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cache_mut(&mut self, field: TextField) -> Option<&mut HashSet<Arc<str>>> {
        let index = INTERNED_FIELDS.iter().position(|f| *f == field)?;
        self.caches.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsift_types::Severity;
    use chrono::{TimeZone, Utc};

    fn record(logger: &str, host: Option<&str>) -> Record {
        let mut record = Record::new(Utc.timestamp_opt(0, 0).unwrap(), Severity::Info, "m")
            .with_logger(logger.to_string())
            .with_thread("main".to_string());
        record.host = host.map(Arc::from);
        record
    }

    #[test]
    fn test_equal_values_share_allocation() {
        let mut interner = FieldInterner::new();
        let a = interner.intern(TextField::Logger, "db.pool");
        let b = interner.intern(TextField::Logger, &String::from("db.pool"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_none_passes_through_uncached() {
        let mut interner = FieldInterner::new();
        assert_eq!(interner.intern_opt(TextField::Host, None), None);
        assert!(interner.is_empty());
    }

    #[test]
    fn test_caches_are_per_field() {
        let mut interner = FieldInterner::new();
        interner.intern(TextField::Logger, "x");
        interner.intern(TextField::Thread, "x");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_intern_record_shares_across_records() {
        let mut interner = FieldInterner::new();
        let first = interner.intern_record(record("db.pool", Some("web-1")));
        let second = interner.intern_record(record("db.pool", Some("web-1")));

        assert!(Arc::ptr_eq(&first.logger, &second.logger));
        assert!(Arc::ptr_eq(&first.thread, &second.thread));
        assert!(Arc::ptr_eq(
            first.host.as_ref().unwrap(),
            second.host.as_ref().unwrap()
        ));
        // Interning must not change what the record says
        assert_eq!(first, second);
        assert_eq!(&*first.logger, "db.pool");
    }

    #[test]
    fn test_message_is_not_interned() {
        let mut interner = FieldInterner::new();
        let before = interner.len();
        interner.intern(TextField::Message, "unique text");
        assert_eq!(interner.len(), before);
    }
}
