use std::sync::Arc;

use log::trace;
use stackscope_protocol::Capabilities;

/// Identity comparison for the inputs of a derived value.
///
/// Shared tables compare by pointer, never by content: a producer that
/// publishes a new table always publishes a new `Arc`. Small `Copy` values
/// have no identity beyond their value and compare with `==`.
pub trait Inputs {
    fn same_as(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Inputs for Arc<T> {
    #[inline]
    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Inputs> Inputs for Option<T> {
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_as(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Inputs for f64 {
    // Bitwise, so a NaN input does not force a recompute on every read.
    #[inline]
    fn same_as(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

macro_rules! impl_value_inputs {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Inputs for $ty {
                #[inline]
                fn same_as(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_value_inputs!(bool, u32, usize, Capabilities);

macro_rules! impl_tuple_inputs {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Inputs),+> Inputs for ($($name,)+) {
            fn same_as(&self, other: &Self) -> bool {
                $(self.$idx.same_as(&other.$idx))&&+
            }
        }
    };
}

impl_tuple_inputs!(A: 0);
impl_tuple_inputs!(A: 0, B: 1);
impl_tuple_inputs!(A: 0, B: 1, C: 2);
impl_tuple_inputs!(A: 0, B: 1, C: 2, D: 3);
impl_tuple_inputs!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple_inputs!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// One node of the derivation graph: a single cached output together with
/// the inputs it was computed from.
///
/// Reads are lazy. A read whose inputs are all identical to the recorded
/// ones returns a clone of the cached value, which for `Arc` outputs is the
/// same reference. Anything else recomputes and replaces the cache.
#[derive(Debug)]
pub struct Memo<K, V> {
    name: &'static str,
    cached: Option<(K, V)>,
    computations: u64,
}

impl<K: Inputs, V: Clone> Memo<K, V> {
    /// An empty node. `name` shows up in trace logs and recompute counts.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cached: None,
            computations: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// How many times the wrapped function has run.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// The cached output, if any, without validating it.
    pub fn peek(&self) -> Option<&V> {
        self.cached.as_ref().map(|(_, value)| value)
    }

    fn hit(&self, inputs: &K) -> Option<V> {
        match &self.cached {
            Some((recorded, value)) if recorded.same_as(inputs) => Some(value.clone()),
            _ => None,
        }
    }

    /// The cached output if `inputs` match the recorded ones, otherwise
    /// the result of `compute`, which then becomes the cache.
    pub fn get_or_compute(&mut self, inputs: K, compute: impl FnOnce(&K) -> V) -> V {
        if let Some(value) = self.hit(&inputs) {
            return value;
        }
        let value = compute(&inputs);
        self.store(inputs, value.clone());
        value
    }

    /// Like [`Memo::get_or_compute`], for fallible derivations. A failure
    /// leaves the previous cache in place and is returned unchanged.
    pub fn try_get_or_compute<E>(
        &mut self,
        inputs: K,
        compute: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.hit(&inputs) {
            return Ok(value);
        }
        let value = compute(&inputs)?;
        self.store(inputs, value.clone());
        Ok(value)
    }

    fn store(&mut self, inputs: K, value: V) {
        self.computations += 1;
        trace!("recomputed {} (#{})", self.name, self.computations);
        self.cached = Some((inputs, value));
    }
}
