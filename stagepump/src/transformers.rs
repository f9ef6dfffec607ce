//! Closure-based [`Transformer`] implementations and adapters.

use std::fmt;

use tracing::warn;

use crate::error::StageError;
use crate::traits::Transformer;

/// Transformer built from two closures.
///
/// `transform` runs on a worker thread and produces staged state of type `S`;
/// `finalize` consumes that state on the draining thread and produces the
/// object.
///
/// ```ignore
/// let upper = FnTransformer::new(
///     |data: &[u8]| Ok(String::from_utf8_lossy(data).into_owned()),
///     |text: String| Ok(text.to_uppercase()),
/// );
/// ```
pub struct FnTransformer<S, TF, FF> {
    transform: TF,
    finalize: FF,
    staged: Option<S>,
}

impl<S, TF, FF> FnTransformer<S, TF, FF> {
    pub fn new(transform: TF, finalize: FF) -> Self {
        Self {
            transform,
            finalize,
            staged: None,
        }
    }

    /// Whether `transform` has produced state not yet finalized.
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }
}

impl<S, O, TF, FF> Transformer for FnTransformer<S, TF, FF>
where
    S: Send,
    TF: FnMut(&[u8]) -> Result<S, StageError> + Send,
    FF: FnMut(S) -> Result<O, StageError> + Send,
{
    type Output = O;

    fn transform(&mut self, data: &[u8]) -> Result<(), StageError> {
        let state = (self.transform)(data)?;
        if self.staged.replace(state).is_some() {
            warn!("Transformer re-run before finalize, discarding previous state");
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<O, StageError> {
        let state = self.staged.take().ok_or(StageError::NotReady)?;
        (self.finalize)(state)
    }
}

impl<S, TF, FF> fmt::Debug for FnTransformer<S, TF, FF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransformer")
            .field("staged", &self.staged.is_some())
            .finish()
    }
}

/// Transformer whose finalized object is passed through a mapping function.
///
/// Created by [`TransformerExt::map_output`]. The mapping runs inside
/// `finalize`, so on the draining thread.
pub struct MapOutput<T, F> {
    inner: T,
    map: F,
}

impl<T, F> MapOutput<T, F> {
    /// Returns the wrapped transformer.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T, F, U> Transformer for MapOutput<T, F>
where
    T: Transformer,
    F: FnMut(T::Output) -> U + Send,
{
    type Output = U;

    fn transform(&mut self, data: &[u8]) -> Result<(), StageError> {
        self.inner.transform(data)
    }

    fn finalize(&mut self) -> Result<U, StageError> {
        self.inner.finalize().map(&mut self.map)
    }
}

impl<T: fmt::Debug, F> fmt::Debug for MapOutput<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOutput")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Adapter methods available on every [`Transformer`].
pub trait TransformerExt: Transformer + Sized {
    /// Maps the finalized object through `map`.
    fn map_output<F, U>(self, map: F) -> MapOutput<Self, F>
    where
        F: FnMut(Self::Output) -> U + Send,
    {
        MapOutput { inner: self, map }
    }
}

impl<T: Transformer> TransformerExt for T {}
