//! Manually invalidated lazy cell.

use crate::error::Result;

/// A cached value that is only recomputed after [`Lazy::invalidate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Lazy<T> {
    #[default]
    Stale,
    Fresh(T),
}

impl<T> Lazy<T> {
    /// Return the cached value, computing it first if stale.
    pub fn get_or_try_init(&mut self, init: impl FnOnce() -> Result<T>) -> Result<&T> {
        if let Lazy::Stale = self {
            *self = Lazy::Fresh(init()?);
        }
        match self {
            Lazy::Fresh(value) => Ok(value),
            Lazy::Stale => unreachable!("lazy value was just initialized"),
        }
    }

    /// Cached value, without computing.
    pub fn get(&self) -> Option<&T> {
        match self {
            Lazy::Fresh(value) => Some(value),
            Lazy::Stale => None,
        }
    }

    pub fn set(&mut self, value: T) {
        *self = Lazy::Fresh(value);
    }

    /// Mark stale, returning the previous value.
    pub fn invalidate(&mut self) -> Option<T> {
        match std::mem::replace(self, Lazy::Stale) {
            Lazy::Fresh(value) => Some(value),
            Lazy::Stale => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Lazy::Fresh(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_computes_once() {
        let mut calls = 0;
        let mut lazy = Lazy::Stale;
        for _ in 0..3 {
            let value = lazy
                .get_or_try_init(|| {
                    calls += 1;
                    Ok(42)
                })
                .unwrap();
            assert_eq!(*value, 42);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_invalidate() {
        let mut lazy = Lazy::Fresh(1);
        assert_eq!(lazy.invalidate(), Some(1));
        assert!(!lazy.is_fresh());
        assert_eq!(lazy.invalidate(), None);
    }

    #[test]
    fn test_failed_init_stays_stale() {
        let mut lazy: Lazy<i32> = Lazy::Stale;
        let result = lazy.get_or_try_init(|| Err(Error::BindingNotRealized("x".into())));
        assert!(result.is_err());
        assert!(!lazy.is_fresh());
    }
}
