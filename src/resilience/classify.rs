//! Error classification.
//!
//! Decides which errors a retry executor re-attempts and which errors a
//! circuit breaker counts as failures. The default matches everything; a
//! narrower filter is either a predicate or a closed set of kinds for error
//! types implementing [`Classify`].

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Maps an error value onto a closed set of kinds.
pub trait Classify {
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Predicate over an error type.
pub struct ErrorFilter<E> {
    predicate: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<E> ErrorFilter<E> {
    /// Every error matches.
    pub fn any() -> Self {
        Self { predicate: None }
    }

    /// Errors for which `predicate` returns true match.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn matches(&self, error: &E) -> bool {
        match &self.predicate {
            None => true,
            Some(predicate) => predicate(error),
        }
    }
}

impl<E: Classify> ErrorFilter<E> {
    /// Errors whose kind is one of `kinds` match.
    pub fn kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = E::Kind>,
    {
        let kinds: HashSet<E::Kind> = kinds.into_iter().collect();
        Self::when(move |error: &E| kinds.contains(&error.kind()))
    }
}

impl<E> Default for ErrorFilter<E> {
    fn default() -> Self {
        Self::any()
    }
}

impl<E> Clone for ErrorFilter<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
        }
    }
}

impl<E> fmt::Debug for ErrorFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.predicate {
            None => f.write_str("ErrorFilter::Any"),
            Some(_) => f.write_str("ErrorFilter::When(..)"),
        }
    }
}
