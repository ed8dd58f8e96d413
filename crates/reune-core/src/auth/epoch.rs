use std::sync::{Mutex, PoisonError};

/// Counter for the credential set a session is operating on.
///
/// It advances whenever the credentials are replaced wholesale, i.e. on
/// termination and on login. A refresh that started under an older epoch
/// must not write its result, otherwise a token would reappear in a store
/// that was just cleared. Advancing and conditional writes hold the same
/// lock, so a write can never land between a clear and the advance.
#[derive(Debug, Default)]
pub struct SessionEpoch {
    current: Mutex<u64>,
}

impl SessionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `replace` and move to the next epoch, atomically with respect to
    /// `write_if_current`
    pub fn advance<T>(&self, replace: impl FnOnce() -> T) -> T {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let result = replace();
        *current += 1;
        result
    }

    /// Run `write` only if the epoch is still `epoch`
    pub fn write_if_current<T>(&self, epoch: u64, write: impl FnOnce() -> T) -> Option<T> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != epoch {
            return None;
        }
        Some(write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_skipped_after_advance() {
        let epoch = SessionEpoch::new();
        let started = epoch.current();

        assert_eq!(epoch.write_if_current(started, || "written"), Some("written"));

        epoch.advance(|| ());
        assert_eq!(epoch.current(), started + 1);
        assert_eq!(epoch.write_if_current(started, || "written"), None);
    }
}
